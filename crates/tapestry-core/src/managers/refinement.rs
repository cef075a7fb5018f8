//! `RefinementManager` (spec §4.5.2): union-find discovery of overlapping
//! memories, LLM refinement, supersession, and embedding of the refined
//! output.
//!
//! Grounded on `context_use/memories/refinement/manager.py`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tapestry_proto::{EmbedItem, LlmJobClient, MemoryStatus, PromptItem, Store, TapestryMemory};
use tracing::info;

use crate::batch_manager::{advance, BatchManager, Transition};
use crate::config::{BatchConfig, CountdownConfig, DiscoveryConfig};
use crate::discovery::discover_refinement_clusters;
use crate::error::OrchestratorError;
use crate::state_catalog::RefinementState;

pub struct RefinementManager {
    batch_id: String,
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmJobClient>,
    limits: BatchConfig,
    countdown: CountdownConfig,
    discovery: DiscoveryConfig,
}

impl RefinementManager {
    pub fn new(
        batch_id: impl Into<String>,
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmJobClient>,
        limits: BatchConfig,
        countdown: CountdownConfig,
        discovery: DiscoveryConfig,
    ) -> Self {
        Self { batch_id: batch_id.into(), store, llm, limits, countdown, discovery }
    }

    async fn discover(&self, seed_ids: &[String]) -> Result<RefinementState, OrchestratorError> {
        if seed_ids.is_empty() {
            return Ok(RefinementState::skipped("No seed memory IDs for refinement"));
        }

        let clusters = discover_refinement_clusters(seed_ids, self.store.as_ref(), &self.discovery).await?;
        if clusters.is_empty() {
            return Ok(RefinementState::skipped("No refinement clusters found"));
        }

        info!(batch_id = %self.batch_id, clusters = clusters.len(), seeds = seed_ids.len(), "discovered refinement clusters");
        Ok(RefinementState::discover(clusters))
    }

    async fn submit_refinement(&self, clusters: &[Vec<String>]) -> Result<RefinementState, OrchestratorError> {
        let mut prompts = Vec::new();
        for (idx, cluster_ids) in clusters.iter().enumerate() {
            let memories = self.store.get_memories(cluster_ids).await?;
            if memories.len() < 2 {
                continue;
            }
            prompts.push(build_refinement_prompt(&format!("cluster-{idx}"), &memories));
        }

        if prompts.is_empty() {
            return Ok(RefinementState::skipped("No valid clusters after loading memories"));
        }

        info!(batch_id = %self.batch_id, prompts = prompts.len(), "submitting refinement batch");
        let job_key = self.llm.batch_submit(&self.batch_id, prompts).await?;
        Ok(RefinementState::pending(job_key))
    }

    async fn check_refinement(&self, job_key: &str) -> Result<RefinementState, OrchestratorError> {
        let Some(results) = self.llm.batch_get_results(job_key).await? else {
            return Ok(RefinementState::pending(job_key.to_string()));
        };

        let (memory_ids, superseded_count) = self.store_refinement_results(results).await?;
        Ok(RefinementState::complete(memory_ids.len() as u64, superseded_count, memory_ids))
    }

    /// Creates one new active memory per refined output and supersedes its
    /// consumed inputs; an id already superseded within this batch is not
    /// touched again (spec §4.5.2's supersession rule).
    async fn store_refinement_results(
        &self,
        results: HashMap<String, Value>,
    ) -> Result<(Vec<String>, u64), OrchestratorError> {
        let mut memory_ids = Vec::new();
        let mut superseded_count = 0u64;
        let mut all_superseded_ids: HashSet<String> = HashSet::new();

        for payload in results.into_values() {
            let refined: Vec<RefinedMemory> = serde_json::from_value(
                payload.get("memories").cloned().unwrap_or(Value::Array(vec![])),
            )
            .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;

            for memory in refined {
                let from_date = chrono::NaiveDate::parse_from_str(&memory.from_date, "%Y-%m-%d")
                    .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;
                let to_date = chrono::NaiveDate::parse_from_str(&memory.to_date, "%Y-%m-%d")
                    .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;

                let mut new_memory = TapestryMemory::new(memory.content, from_date, to_date, "refinement");
                new_memory.source_memory_ids = Some(memory.source_ids.clone());
                let new_memory = self.store.create_memory(new_memory).await?;
                memory_ids.push(new_memory.id.clone());

                for source_id in &memory.source_ids {
                    if all_superseded_ids.contains(source_id) {
                        continue;
                    }
                    let Some(mut source) = self.store.get_memories(std::slice::from_ref(source_id)).await?.into_iter().next() else {
                        continue;
                    };
                    if source.status == MemoryStatus::Active {
                        source.status = MemoryStatus::Superseded;
                        source.superseded_by = Some(new_memory.id.clone());
                        self.store.update_memory(source).await?;
                        all_superseded_ids.insert(source_id.clone());
                        superseded_count += 1;
                    }
                }
            }
        }

        info!(batch_id = %self.batch_id, created = memory_ids.len(), superseded_count, "stored refinement results");
        Ok((memory_ids, superseded_count))
    }

    async fn trigger_embedding(&self, memory_ids: &[String]) -> Result<RefinementState, OrchestratorError> {
        if memory_ids.is_empty() {
            return Ok(RefinementState::embed_complete(0));
        }
        let unembedded = self.store.get_unembedded_memories(memory_ids).await?;
        if unembedded.is_empty() {
            return Ok(RefinementState::embed_complete(0));
        }

        let items = unembedded
            .into_iter()
            .map(|m| EmbedItem { item_id: m.id, text: m.content })
            .collect::<Vec<_>>();

        info!(batch_id = %self.batch_id, count = items.len(), "submitting refinement embed batch");
        let job_key = self.llm.embed_batch_submit(&self.batch_id, items).await?;
        Ok(RefinementState::embed_pending(job_key))
    }

    async fn check_embedding(&self, job_key: &str) -> Result<RefinementState, OrchestratorError> {
        let Some(results) = self.llm.embed_batch_get_results(job_key).await? else {
            return Ok(RefinementState::embed_pending(job_key.to_string()));
        };

        let mut count = 0;
        for (memory_id, vector) in results {
            let Some(mut memory) = self.store.get_memories(&[memory_id.clone()]).await?.into_iter().next() else {
                tracing::warn!(batch_id = %self.batch_id, memory_id, "memory not found, skipping embedding");
                continue;
            };
            memory.embedding = Some(vector);
            self.store.update_memory(memory).await?;
            count += 1;
        }
        info!(batch_id = %self.batch_id, count, "stored refinement embeddings");
        Ok(RefinementState::embed_complete(count))
    }
}

#[derive(serde::Deserialize)]
struct RefinedMemory {
    content: String,
    from_date: String,
    to_date: String,
    source_ids: Vec<String>,
}

fn refinement_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "from_date": {"type": "string"},
                        "to_date": {"type": "string"},
                        "source_ids": {"type": "array", "items": {"type": "string"}},
                    },
                    "required": ["content", "from_date", "to_date", "source_ids"],
                },
            },
        },
        "required": ["memories"],
    })
}

/// One prompt per cluster, listing its memories for the LLM to merge.
fn build_refinement_prompt(cluster_id: &str, memories: &[TapestryMemory]) -> PromptItem {
    let mut lines = Vec::new();
    for memory in memories {
        lines.push(format!(
            "- id={} [{}..{}]: {}",
            memory.id, memory.from_date, memory.to_date, memory.content
        ));
    }

    let prompt = format!(
        "You are given overlapping memories that may describe the same period of \
         someone's life. Merge them into fewer, richer memories. Respond as a JSON \
         object with a `memories` array, each with `content`, `from_date`, `to_date`, \
         and `source_ids` (the ids of every input memory it supersedes).\n\n{}",
        lines.join("\n")
    );

    PromptItem {
        item_id: cluster_id.to_string(),
        prompt,
        response_schema: refinement_response_schema(),
        asset_paths: Vec::new(),
    }
}

#[async_trait]
impl Transition<RefinementState> for RefinementManager {
    async fn transition(&self, current: &RefinementState) -> Result<Option<RefinementState>, OrchestratorError> {
        let next = match current {
            RefinementState::RefinementCreated { seed_memory_ids, .. } => self.discover(seed_memory_ids).await?,
            RefinementState::Discover { clusters, .. } => self.submit_refinement(clusters).await?,
            RefinementState::Pending { job_key, .. } => self.check_refinement(job_key).await?,
            RefinementState::Complete { created_memory_ids, .. } => self.trigger_embedding(created_memory_ids).await?,
            RefinementState::EmbedPending { job_key, .. } => self.check_embedding(job_key).await?,
            RefinementState::EmbedComplete { .. } => RefinementState::terminal(),
            RefinementState::Terminal { .. } | RefinementState::Skipped { .. } | RefinementState::Failed { .. } => {
                return Ok(None);
            }
        };
        Ok(Some(next))
    }
}

#[async_trait]
impl BatchManager for RefinementManager {
    async fn try_advance_state(&mut self) -> Result<tapestry_proto::ScheduleInstruction, OrchestratorError> {
        advance::<RefinementState, Self>(&self.batch_id, self.store.as_ref(), &self.limits, &self.countdown, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct NoopLlm;
    #[async_trait]
    impl LlmJobClient for NoopLlm {
        async fn batch_submit(&self, _: &str, _: Vec<PromptItem>) -> Result<String, tapestry_proto::ProtoError> {
            unreachable!()
        }
        async fn batch_get_results(&self, _: &str) -> Result<Option<HashMap<String, Value>>, tapestry_proto::ProtoError> {
            unreachable!()
        }
        async fn embed_batch_submit(&self, _: &str, _: Vec<EmbedItem>) -> Result<String, tapestry_proto::ProtoError> {
            unreachable!()
        }
        async fn embed_batch_get_results(&self, _: &str) -> Result<Option<HashMap<String, Vec<f32>>>, tapestry_proto::ProtoError> {
            unreachable!()
        }
    }

    fn manager(store: Arc<dyn Store>) -> RefinementManager {
        RefinementManager::new(
            "batch-1",
            store,
            Arc::new(NoopLlm),
            BatchConfig::default(),
            CountdownConfig::refinement_default(),
            DiscoveryConfig::default(),
        )
    }

    #[tokio::test]
    async fn discover_skips_with_no_seeds() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mgr = manager(store);
        let next = mgr.transition(&RefinementState::refinement_created(Vec::new())).await.unwrap().unwrap();
        assert!(matches!(next, RefinementState::Skipped { .. }));
    }

    #[tokio::test]
    async fn discover_skips_when_no_clusters_survive() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut m1 = TapestryMemory::new("coffee", date("2024-01-01"), date("2024-01-05"), "g1");
        m1.embedding = Some(vec![0.0; tapestry_proto::EMBEDDING_DIMENSIONS]);
        let m1 = store.create_memory(m1).await.unwrap();

        let mgr = manager(store);
        let next = mgr.transition(&RefinementState::refinement_created(vec![m1.id])).await.unwrap().unwrap();
        assert!(matches!(next, RefinementState::Skipped { .. }));
    }

    #[tokio::test]
    async fn supersession_marks_both_sources() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let m1 = store
            .create_memory(TapestryMemory::new("coffee with Alice", date("2024-01-01"), date("2024-01-05"), "g1"))
            .await
            .unwrap();
        let m2 = store
            .create_memory(TapestryMemory::new("lunch with Alice", date("2024-01-03"), date("2024-01-07"), "g1"))
            .await
            .unwrap();

        let mgr = manager(store.clone());
        let results = HashMap::from([(
            "cluster-0".to_string(),
            json!({
                "memories": [{
                    "content": "Alice hangouts in early January",
                    "from_date": "2024-01-01",
                    "to_date": "2024-01-07",
                    "source_ids": [m1.id.clone(), m2.id.clone()],
                }]
            }),
        )]);

        let (ids, superseded) = mgr.store_refinement_results(results).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(superseded, 2);

        let reloaded_m1 = store.get_memories(&[m1.id.clone()]).await.unwrap().remove(0);
        assert_eq!(reloaded_m1.status, MemoryStatus::Superseded);
        assert_eq!(reloaded_m1.superseded_by, Some(ids[0].clone()));

        let reloaded_m2 = store.get_memories(&[m2.id.clone()]).await.unwrap().remove(0);
        assert_eq!(reloaded_m2.status, MemoryStatus::Superseded);
        assert_eq!(reloaded_m2.superseded_by, Some(ids[0].clone()));

        let new_memory = store.get_memories(&[ids[0].clone()]).await.unwrap().remove(0);
        assert_eq!(new_memory.status, MemoryStatus::Active);
        assert_eq!(new_memory.source_memory_ids, Some(vec![m1.id, m2.id]));
    }
}
