//! The pure, synchronous store algorithm shared by `InMemoryStore` and
//! `FileStore`: plain maps plus the filtering/sorting/cosine-similarity
//! logic spec §4.8 requires, with no locking or persistence concerns of
//! its own. Both concrete stores wrap one `StoreState` differently —
//! `InMemoryStore` behind a bare `tokio::sync::Mutex`, `FileStore` behind a
//! mutex plus a reload-mutate-persist cycle through `FileLock`.
//!
//! Grounded directly on `context_use/store/memory.py`'s `InMemoryStore`.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tapestry_proto::{
    Archive, ArchiveStatus, Batch, BatchThread, EMBEDDING_DIMENSIONS, EtlTask, MemorySearchResult,
    MemoryStatus, ProtoError, TapestryMemory, TapestryProfile, Thread, ThreadGroup, ThreadRow,
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    archives: HashMap<String, Archive>,
    tasks: HashMap<String, EtlTask>,
    threads: HashMap<String, Thread>,
    thread_unique_keys: HashSet<String>,
    batches: HashMap<String, Batch>,
    batch_threads: Vec<BatchThread>,
    memories: HashMap<String, TapestryMemory>,
    profiles: HashMap<String, TapestryProfile>,
}

impl StoreState {
    // ── Archives ─────────────────────────────────────────────────────

    pub(crate) fn create_archive(&mut self, archive: Archive) -> Archive {
        self.archives.insert(archive.id.clone(), archive.clone());
        archive
    }

    pub(crate) fn get_archive(&self, archive_id: &str) -> Option<Archive> {
        self.archives.get(archive_id).cloned()
    }

    pub(crate) fn update_archive(&mut self, archive: Archive) {
        self.archives.insert(archive.id.clone(), archive);
    }

    pub(crate) fn list_archives(&self, status: Option<&str>) -> Vec<Archive> {
        let mut archives: Vec<Archive> = self
            .archives
            .values()
            .filter(|a| status.is_none_or(|s| archive_status_as_str(a.status) == s))
            .cloned()
            .collect();
        archives.sort_by_key(|a| a.created_at);
        archives
    }

    pub(crate) fn count_threads_for_archive(&self, archive_id: &str) -> u64 {
        let task_ids: HashSet<&str> = self
            .tasks
            .values()
            .filter(|t| t.archive_id == archive_id)
            .map(|t| t.id.as_str())
            .collect();
        self.threads
            .values()
            .filter(|t| task_ids.contains(t.etl_task_id.as_str()))
            .count() as u64
    }

    // ── ETL tasks ────────────────────────────────────────────────────

    pub(crate) fn create_task(&mut self, task: EtlTask) -> EtlTask {
        self.tasks.insert(task.id.clone(), task.clone());
        task
    }

    pub(crate) fn get_task(&self, task_id: &str) -> Option<EtlTask> {
        self.tasks.get(task_id).cloned()
    }

    pub(crate) fn update_task(&mut self, task: EtlTask) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub(crate) fn get_tasks_by_archive(&self, archive_ids: &[String]) -> Vec<EtlTask> {
        let ids: HashSet<&str> = archive_ids.iter().map(String::as_str).collect();
        self.tasks
            .values()
            .filter(|t| ids.contains(t.archive_id.as_str()))
            .cloned()
            .collect()
    }

    // ── Threads ──────────────────────────────────────────────────────

    pub(crate) fn insert_threads(&mut self, rows: Vec<ThreadRow>, task_id: &str) -> u64 {
        let mut inserted = 0;
        for row in rows {
            if self.thread_unique_keys.contains(&row.unique_key) {
                continue;
            }
            self.thread_unique_keys.insert(row.unique_key.clone());
            let thread = row.into_thread(task_id);
            self.threads.insert(thread.id.clone(), thread);
            inserted += 1;
        }
        inserted
    }

    pub(crate) fn get_threads_by_task(&self, task_ids: &[String]) -> Vec<Thread> {
        let ids: HashSet<&str> = task_ids.iter().map(String::as_str).collect();
        let mut threads: Vec<Thread> = self
            .threads
            .values()
            .filter(|t| ids.contains(t.etl_task_id.as_str()))
            .cloned()
            .collect();
        threads.sort_by(|a, b| a.asat.cmp(&b.asat).then_with(|| a.id.cmp(&b.id)));
        threads
    }

    // ── Batches ──────────────────────────────────────────────────────

    pub(crate) fn create_batch(&mut self, batch: Batch, groups: &[ThreadGroup]) -> Batch {
        self.batches.insert(batch.id.clone(), batch.clone());
        for group in groups {
            for thread in &group.threads {
                self.batch_threads.push(BatchThread {
                    batch_id: batch.id.clone(),
                    thread_id: thread.id.clone(),
                    group_id: group.group_id.clone(),
                });
            }
        }
        batch
    }

    pub(crate) fn get_batch(&self, batch_id: &str) -> Option<Batch> {
        self.batches.get(batch_id).cloned()
    }

    pub(crate) fn update_batch(&mut self, batch: Batch) {
        self.batches.insert(batch.id.clone(), batch);
    }

    /// Reconstructs groups ordered by `group_id`, threads within a group
    /// ordered by `asat` (spec §4.8).
    pub(crate) fn get_batch_groups(&self, batch_id: &str) -> Vec<ThreadGroup> {
        let mut groups_map: HashMap<String, Vec<Thread>> = HashMap::new();
        for bt in &self.batch_threads {
            if bt.batch_id != batch_id {
                continue;
            }
            if let Some(thread) = self.threads.get(&bt.thread_id) {
                groups_map.entry(bt.group_id.clone()).or_default().push(thread.clone());
            }
        }

        let mut groups: Vec<ThreadGroup> = groups_map
            .into_iter()
            .map(|(group_id, mut threads)| {
                threads.sort_by_key(|t| t.asat);
                ThreadGroup { group_id, threads }
            })
            .collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        groups
    }

    // ── Memories ─────────────────────────────────────────────────────

    pub(crate) fn create_memory(&mut self, memory: TapestryMemory) -> Result<TapestryMemory, ProtoError> {
        validate_embedding(&memory)?;
        self.memories.insert(memory.id.clone(), memory.clone());
        Ok(memory)
    }

    pub(crate) fn get_memories(&self, ids: &[String]) -> Vec<TapestryMemory> {
        ids.iter().filter_map(|id| self.memories.get(id).cloned()).collect()
    }

    pub(crate) fn get_unembedded_memories(&self, ids: &[String]) -> Vec<TapestryMemory> {
        ids.iter()
            .filter_map(|id| self.memories.get(id))
            .filter(|m| m.embedding.is_none())
            .cloned()
            .collect()
    }

    pub(crate) fn update_memory(&mut self, memory: TapestryMemory) -> Result<(), ProtoError> {
        validate_embedding(&memory)?;
        self.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    pub(crate) fn list_memories(
        &self,
        status: Option<&str>,
        from_date: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> Vec<TapestryMemory> {
        let mut result: Vec<TapestryMemory> = self
            .memories
            .values()
            .filter(|m| status.is_none_or(|s| status_as_str(m.status) == s))
            .filter(|m| from_date.is_none_or(|d| m.from_date >= d))
            .cloned()
            .collect();
        result.sort_by_key(|m| m.from_date);
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        result
    }

    pub(crate) fn count_memories(&self, status: Option<&str>) -> u64 {
        match status {
            None => self.memories.len() as u64,
            Some(s) => self
                .memories
                .values()
                .filter(|m| status_as_str(m.status) == s)
                .count() as u64,
        }
    }

    pub(crate) fn search_memories(
        &self,
        query_embedding: Option<&[f32]>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        top_k: usize,
    ) -> Vec<MemorySearchResult> {
        let mut candidates: Vec<&TapestryMemory> = self
            .memories
            .values()
            .filter(|m| m.status == MemoryStatus::Active)
            .filter(|m| from_date.is_none_or(|d| m.from_date >= d))
            .filter(|m| to_date.is_none_or(|d| m.to_date <= d))
            .collect();

        if let Some(query) = query_embedding {
            let mut scored: Vec<(&TapestryMemory, f32)> = candidates
                .into_iter()
                .filter_map(|m| m.embedding.as_ref().map(|e| (m, cosine_similarity(query, e))))
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            scored.truncate(top_k);
            return scored
                .into_iter()
                .map(|(m, sim)| search_result(m, Some(sim)))
                .collect();
        }

        candidates.sort_by(|a, b| b.from_date.cmp(&a.from_date));
        candidates.truncate(top_k);
        candidates.into_iter().map(|m| search_result(m, None)).collect()
    }

    /// Active ∧ embedded ∧ `source_memory_ids` null (spec §4.8).
    pub(crate) fn get_refinable_memory_ids(&self) -> Vec<String> {
        self.memories
            .values()
            .filter(|m| m.is_refinable())
            .map(|m| m.id.clone())
            .collect()
    }

    pub(crate) fn find_similar_memories(
        &self,
        seed_id: &str,
        date_proximity_days: i64,
        similarity_threshold: f32,
        max_candidates: usize,
    ) -> Vec<String> {
        let Some(seed) = self.memories.get(seed_id) else {
            return Vec::new();
        };
        let Some(seed_embedding) = seed.embedding.as_ref() else {
            return Vec::new();
        };

        let proximity = chrono::Duration::days(date_proximity_days);
        let cosine_threshold = 1.0 - similarity_threshold;

        let mut scored: Vec<(String, f32)> = self
            .memories
            .values()
            .filter(|m| m.id != seed_id)
            .filter(|m| m.status == MemoryStatus::Active)
            .filter_map(|m| m.embedding.as_ref().map(|e| (m, e)))
            .filter(|(m, _)| m.from_date <= seed.to_date + proximity)
            .filter(|(m, _)| m.to_date >= seed.from_date - proximity)
            .filter_map(|(m, embedding)| {
                let distance = 1.0 - cosine_similarity(seed_embedding, embedding);
                (distance < cosine_threshold).then(|| (m.id.clone(), distance))
            })
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(max_candidates);
        scored.into_iter().map(|(id, _)| id).collect()
    }

    // ── Profiles ─────────────────────────────────────────────────────

    pub(crate) fn get_latest_profile(&self) -> Option<TapestryProfile> {
        self.profiles.values().max_by_key(|p| p.generated_at).cloned()
    }

    pub(crate) fn save_profile(&mut self, profile: TapestryProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }
}

fn validate_embedding(memory: &TapestryMemory) -> Result<(), ProtoError> {
    if let Some(embedding) = &memory.embedding {
        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(ProtoError::EmbeddingDimensionMismatch {
                expected: EMBEDDING_DIMENSIONS,
                actual: embedding.len(),
            });
        }
    }
    Ok(())
}

fn status_as_str(status: MemoryStatus) -> &'static str {
    match status {
        MemoryStatus::Active => "active",
        MemoryStatus::Superseded => "superseded",
    }
}

fn archive_status_as_str(status: ArchiveStatus) -> &'static str {
    match status {
        ArchiveStatus::Created => "created",
        ArchiveStatus::Completed => "completed",
        ArchiveStatus::Failed => "failed",
    }
}

fn search_result(m: &TapestryMemory, similarity: Option<f32>) -> MemorySearchResult {
    MemorySearchResult {
        id: m.id.clone(),
        content: m.content.clone(),
        from_date: m.from_date,
        to_date: m.to_date,
        similarity,
    }
}

/// Cosine similarity between two equal-length vectors; `0.0` if either is
/// a zero vector, matching `context_use/store/memory.py::_cosine_similarity`.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
