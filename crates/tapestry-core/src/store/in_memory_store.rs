//! `InMemoryStore` — a `tokio::sync::Mutex`-guarded `StoreState`, no
//! persistence. Directly modeled on
//! `context_use/store/memory.py::InMemoryStore`; used for fast unit and
//! integration tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use tapestry_proto::{
    Archive, Batch, EtlTask, MemorySearchResult, ProtoError, Store, TapestryMemory,
    TapestryProfile, Thread, ThreadGroup, ThreadRow,
};
use tokio::sync::Mutex;

use super::state::StoreState;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_archive(&self, archive: Archive) -> Result<Archive, ProtoError> {
        Ok(self.state.lock().await.create_archive(archive))
    }

    async fn get_archive(&self, archive_id: &str) -> Result<Option<Archive>, ProtoError> {
        Ok(self.state.lock().await.get_archive(archive_id))
    }

    async fn update_archive(&self, archive: Archive) -> Result<(), ProtoError> {
        self.state.lock().await.update_archive(archive);
        Ok(())
    }

    async fn list_archives(&self, status: Option<&str>) -> Result<Vec<Archive>, ProtoError> {
        Ok(self.state.lock().await.list_archives(status))
    }

    async fn count_threads_for_archive(&self, archive_id: &str) -> Result<u64, ProtoError> {
        Ok(self.state.lock().await.count_threads_for_archive(archive_id))
    }

    async fn create_task(&self, task: EtlTask) -> Result<EtlTask, ProtoError> {
        Ok(self.state.lock().await.create_task(task))
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<EtlTask>, ProtoError> {
        Ok(self.state.lock().await.get_task(task_id))
    }

    async fn update_task(&self, task: EtlTask) -> Result<(), ProtoError> {
        self.state.lock().await.update_task(task);
        Ok(())
    }

    async fn get_tasks_by_archive(&self, archive_ids: &[String]) -> Result<Vec<EtlTask>, ProtoError> {
        Ok(self.state.lock().await.get_tasks_by_archive(archive_ids))
    }

    async fn insert_threads(&self, rows: Vec<ThreadRow>, task_id: &str) -> Result<u64, ProtoError> {
        Ok(self.state.lock().await.insert_threads(rows, task_id))
    }

    async fn get_threads_by_task(&self, task_ids: &[String]) -> Result<Vec<Thread>, ProtoError> {
        Ok(self.state.lock().await.get_threads_by_task(task_ids))
    }

    async fn create_batch(&self, batch: Batch, groups: &[ThreadGroup]) -> Result<Batch, ProtoError> {
        Ok(self.state.lock().await.create_batch(batch, groups))
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, ProtoError> {
        Ok(self.state.lock().await.get_batch(batch_id))
    }

    async fn update_batch(&self, batch: Batch) -> Result<(), ProtoError> {
        self.state.lock().await.update_batch(batch);
        Ok(())
    }

    async fn get_batch_groups(&self, batch_id: &str) -> Result<Vec<ThreadGroup>, ProtoError> {
        Ok(self.state.lock().await.get_batch_groups(batch_id))
    }

    async fn create_memory(&self, memory: TapestryMemory) -> Result<TapestryMemory, ProtoError> {
        self.state.lock().await.create_memory(memory)
    }

    async fn get_memories(&self, ids: &[String]) -> Result<Vec<TapestryMemory>, ProtoError> {
        Ok(self.state.lock().await.get_memories(ids))
    }

    async fn get_unembedded_memories(&self, ids: &[String]) -> Result<Vec<TapestryMemory>, ProtoError> {
        Ok(self.state.lock().await.get_unembedded_memories(ids))
    }

    async fn update_memory(&self, memory: TapestryMemory) -> Result<(), ProtoError> {
        self.state.lock().await.update_memory(memory)
    }

    async fn list_memories(
        &self,
        status: Option<&str>,
        from_date: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> Result<Vec<TapestryMemory>, ProtoError> {
        Ok(self.state.lock().await.list_memories(status, from_date, limit))
    }

    async fn count_memories(&self, status: Option<&str>) -> Result<u64, ProtoError> {
        Ok(self.state.lock().await.count_memories(status))
    }

    async fn search_memories(
        &self,
        query_embedding: Option<&[f32]>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        top_k: usize,
    ) -> Result<Vec<MemorySearchResult>, ProtoError> {
        Ok(self
            .state
            .lock()
            .await
            .search_memories(query_embedding, from_date, to_date, top_k))
    }

    async fn get_refinable_memory_ids(&self) -> Result<Vec<String>, ProtoError> {
        Ok(self.state.lock().await.get_refinable_memory_ids())
    }

    async fn find_similar_memories(
        &self,
        seed_id: &str,
        date_proximity_days: i64,
        similarity_threshold: f32,
        max_candidates: usize,
    ) -> Result<Vec<String>, ProtoError> {
        Ok(self.state.lock().await.find_similar_memories(
            seed_id,
            date_proximity_days,
            similarity_threshold,
            max_candidates,
        ))
    }

    async fn get_latest_profile(&self) -> Result<Option<TapestryProfile>, ProtoError> {
        Ok(self.state.lock().await.get_latest_profile())
    }

    async fn save_profile(&self, profile: TapestryProfile) -> Result<(), ProtoError> {
        self.state.lock().await.save_profile(profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tapestry_proto::{BatchCategory, TapestryMemory};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn insert_threads_dedups_by_unique_key() {
        let store = InMemoryStore::new();
        let archive = store.create_archive(Archive::new("chatgpt", vec![])).await.unwrap();
        let task = store
            .create_task(EtlTask::new(&archive.id, "chatgpt", "chat_message", vec!["a.json".into()]))
            .await
            .unwrap();

        let row = ThreadRow {
            unique_key: "chat_message:abc".into(),
            provider: "chatgpt".into(),
            interaction_type: "chat_message".into(),
            preview: "hi".into(),
            payload: serde_json::json!({}),
            version: "v1".into(),
            asat: chrono::Utc::now(),
            asset_uri: None,
            source: None,
            tapestry_id: None,
        };

        let inserted_once = store.insert_threads(vec![row.clone()], &task.id).await.unwrap();
        let inserted_twice = store.insert_threads(vec![row], &task.id).await.unwrap();
        assert_eq!(inserted_once, 1);
        assert_eq!(inserted_twice, 0);
    }

    #[tokio::test]
    async fn rejects_embedding_of_wrong_dimension() {
        let store = InMemoryStore::new();
        let mut memory = TapestryMemory::new("hi", date("2024-01-01"), date("2024-01-01"), "g1");
        memory.embedding = Some(vec![0.0; 10]);
        let err = store.create_memory(memory).await.unwrap_err();
        assert!(matches!(err, ProtoError::EmbeddingDimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn get_refinable_memory_ids_excludes_refined_rows() {
        let store = InMemoryStore::new();
        let mut embedded = TapestryMemory::new("a", date("2024-01-01"), date("2024-01-01"), "g1");
        embedded.embedding = Some(vec![0.0; tapestry_proto::EMBEDDING_DIMENSIONS]);
        let mut refined_output = TapestryMemory::new("b", date("2024-01-01"), date("2024-01-01"), "g1");
        refined_output.embedding = Some(vec![0.0; tapestry_proto::EMBEDDING_DIMENSIONS]);
        refined_output.source_memory_ids = Some(vec![embedded.id.clone()]);

        let embedded = store.create_memory(embedded).await.unwrap();
        store.create_memory(refined_output).await.unwrap();

        let refinable = store.get_refinable_memory_ids().await.unwrap();
        assert_eq!(refinable, vec![embedded.id]);
    }

    #[tokio::test]
    async fn batch_groups_round_trip_through_create_batch() {
        let store = InMemoryStore::new();
        let archive = store.create_archive(Archive::new("chatgpt", vec![])).await.unwrap();
        let task = store
            .create_task(EtlTask::new(&archive.id, "chatgpt", "chat_message", vec!["a.json".into()]))
            .await
            .unwrap();
        let row = ThreadRow {
            unique_key: "chat_message:xyz".into(),
            provider: "chatgpt".into(),
            interaction_type: "chat_message".into(),
            preview: "hi".into(),
            payload: serde_json::json!({}),
            version: "v1".into(),
            asat: chrono::Utc::now(),
            asset_uri: None,
            source: None,
            tapestry_id: None,
        };
        store.insert_threads(vec![row], &task.id).await.unwrap();
        let thread = &store.get_threads_by_task(&[task.id.clone()]).await.unwrap()[0];

        let group = ThreadGroup {
            group_id: "2024-01-01/2024-01-05".into(),
            threads: vec![thread.clone()],
        };
        let batch = store
            .create_batch(
                Batch::new(1, BatchCategory::Memories, serde_json::json!({"status": "CREATED"})),
                &[group],
            )
            .await
            .unwrap();

        let groups = store.get_batch_groups(&batch.id).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].threads.len(), 1);
    }
}
