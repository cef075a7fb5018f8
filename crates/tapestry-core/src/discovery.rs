//! Refinement seed discovery (spec §4.7): union-find clustering of
//! semantically-and-temporally overlapping memories.
//!
//! Grounded on `context_use/memories/refinement/discovery.py`'s
//! `_UnionFind`/`discover_refinement_clusters`.

use std::collections::HashMap;

use tapestry_proto::{ProtoError, Store};
use tracing::debug;

use crate::config::DiscoveryConfig;

/// Disjoint-set with path compression, keyed by memory id.
#[derive(Debug, Default)]
struct UnionFind {
    parent: HashMap<String, String>,
}

impl UnionFind {
    fn find(&mut self, x: &str) -> String {
        if !self.parent.contains_key(x) {
            self.parent.insert(x.to_string(), x.to_string());
        }
        let mut cur = x.to_string();
        loop {
            let p = self.parent.get(&cur).expect("inserted above").clone();
            if p == cur {
                return cur;
            }
            let grandparent = self.parent.get(&p).expect("inserted above").clone();
            self.parent.insert(cur.clone(), grandparent.clone());
            cur = grandparent;
        }
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }

    fn clusters(&mut self) -> Vec<Vec<String>> {
        let items: Vec<String> = self.parent.keys().cloned().collect();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for item in items {
            let root = self.find(&item);
            groups.entry(root).or_default().push(item);
        }
        groups.into_values().collect()
    }
}

/// Finds clusters of active memories that should be refined together.
///
/// For each seed memory with an embedding, asks the store for existing
/// active memories whose date ranges overlap within
/// `date_proximity_days` AND whose embedding cosine similarity exceeds
/// `similarity_threshold` (`Store::find_similar_memories` already applies
/// both criteria). Overlapping candidate sets are merged via union-find.
/// Returns clusters of size >= 2; singletons are excluded.
pub async fn discover_refinement_clusters(
    seed_memory_ids: &[String],
    store: &dyn Store,
    config: &DiscoveryConfig,
) -> Result<Vec<Vec<String>>, ProtoError> {
    if seed_memory_ids.is_empty() {
        return Ok(Vec::new());
    }

    let seeds = store.get_memories(seed_memory_ids).await?;
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let mut uf = UnionFind::default();

    for seed in &seeds {
        if seed.embedding.is_none() {
            continue;
        }

        let candidate_ids = store
            .find_similar_memories(
                &seed.id,
                config.date_proximity_days,
                config.similarity_threshold,
                config.max_candidates_per_seed,
            )
            .await?;

        debug!(seed_id = %seed.id, candidates = candidate_ids.len(), "discovery candidates");

        for candidate_id in &candidate_ids {
            uf.union(&seed.id, candidate_id);
        }
        // Ensures a seed with zero candidates still appears as a singleton
        // root, matching the root the Python reference registers via the
        // trailing `uf.find(seed.id)` call.
        uf.find(&seed.id);
    }

    Ok(uf.clusters().into_iter().filter(|c| c.len() >= 2).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_find_clusters_are_symmetric() {
        let mut uf = UnionFind::default();
        uf.union("a", "b");
        uf.union("c", "d");
        uf.union("b", "c");
        let clusters = uf.clusters();
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        for id in ["a", "b", "c", "d"] {
            assert!(cluster.contains(&id.to_string()));
        }
    }

    #[test]
    fn singleton_roots_have_no_cluster_partner() {
        let mut uf = UnionFind::default();
        uf.find("solo");
        let clusters = uf.clusters();
        assert_eq!(clusters, vec![vec!["solo".to_string()]]);
    }
}
