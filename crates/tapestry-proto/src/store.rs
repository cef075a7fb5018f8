//! The `Store` contract (spec §4.8): the transactional boundary every
//! manager uses.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::archive::Archive;
use crate::batch::{Batch, BatchThread};
use crate::error::ProtoError;
use crate::etl_task::EtlTask;
use crate::memory::{MemorySearchResult, TapestryMemory, TapestryProfile};
use crate::thread::{Thread, ThreadGroup, ThreadRow};

/// Transactional persistence for archives, tasks, threads, batches,
/// memories, and profiles; vector search; union-find seed queries.
///
/// `atomic()` from spec §4.8 (a scoped transactional boundary, nested calls
/// reusing the outermost) is not exposed as a generic trait method here —
/// a generic method would make `dyn Store` impossible to use as a trait
/// object, which every caller needs (managers hold an `Arc<dyn Store>`).
/// Instead each concrete implementation guarantees the boundary internally:
/// `FileStore` serializes every read-modify-write behind its own
/// `FileLock` plus an in-process mutex; `InMemoryStore` serializes behind a
/// single `tokio::sync::Mutex`. Callers express a transactional
/// read-modify-write as `get_*` followed by `update_*`/`create_*`, the same
/// sequence spec §4.4's `try_advance_state` algorithm describes; the
/// concrete store is the arbiter of isolation, exactly as spec §5 notes.
///
/// All operations are idempotent under re-execution with the same inputs
/// except `insert_threads`, which is idempotent by `unique_key` dedup
/// rather than by full-operation replay.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Archives ─────────────────────────────────────────────────────
    async fn create_archive(&self, archive: Archive) -> Result<Archive, ProtoError>;
    async fn get_archive(&self, archive_id: &str) -> Result<Option<Archive>, ProtoError>;
    async fn update_archive(&self, archive: Archive) -> Result<(), ProtoError>;
    async fn list_archives(&self, status: Option<&str>) -> Result<Vec<Archive>, ProtoError>;
    async fn count_threads_for_archive(&self, archive_id: &str) -> Result<u64, ProtoError>;

    // ── ETL tasks ────────────────────────────────────────────────────
    async fn create_task(&self, task: EtlTask) -> Result<EtlTask, ProtoError>;
    async fn get_task(&self, task_id: &str) -> Result<Option<EtlTask>, ProtoError>;
    async fn update_task(&self, task: EtlTask) -> Result<(), ProtoError>;
    async fn get_tasks_by_archive(&self, archive_ids: &[String]) -> Result<Vec<EtlTask>, ProtoError>;

    // ── Threads ──────────────────────────────────────────────────────
    /// Deduplicates on `unique_key`; returns the number actually inserted.
    async fn insert_threads(&self, rows: Vec<ThreadRow>, task_id: &str) -> Result<u64, ProtoError>;
    async fn get_threads_by_task(&self, task_ids: &[String]) -> Result<Vec<Thread>, ProtoError>;

    // ── Batches ──────────────────────────────────────────────────────
    /// Inserts the batch and its `BatchThread` rows atomically.
    async fn create_batch(&self, batch: Batch, groups: &[ThreadGroup]) -> Result<Batch, ProtoError>;
    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, ProtoError>;
    async fn update_batch(&self, batch: Batch) -> Result<(), ProtoError>;
    /// Reconstructs `[ThreadGroup]` ordered by group_id then by `asat`.
    async fn get_batch_groups(&self, batch_id: &str) -> Result<Vec<ThreadGroup>, ProtoError>;

    // ── Memories ─────────────────────────────────────────────────────
    async fn create_memory(&self, memory: TapestryMemory) -> Result<TapestryMemory, ProtoError>;
    async fn get_memories(&self, ids: &[String]) -> Result<Vec<TapestryMemory>, ProtoError>;
    async fn get_unembedded_memories(&self, ids: &[String]) -> Result<Vec<TapestryMemory>, ProtoError>;
    async fn update_memory(&self, memory: TapestryMemory) -> Result<(), ProtoError>;
    async fn list_memories(
        &self,
        status: Option<&str>,
        from_date: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> Result<Vec<TapestryMemory>, ProtoError>;
    async fn count_memories(&self, status: Option<&str>) -> Result<u64, ProtoError>;
    async fn search_memories(
        &self,
        query_embedding: Option<&[f32]>,
        from_date: Option<NaiveDate>,
        to_date: Option<NaiveDate>,
        top_k: usize,
    ) -> Result<Vec<MemorySearchResult>, ProtoError>;
    /// Active ∧ embedded ∧ `source_memory_ids` null.
    async fn get_refinable_memory_ids(&self) -> Result<Vec<String>, ProtoError>;
    async fn find_similar_memories(
        &self,
        seed_id: &str,
        date_proximity_days: i64,
        similarity_threshold: f32,
        max_candidates: usize,
    ) -> Result<Vec<String>, ProtoError>;

    // ── Profiles ─────────────────────────────────────────────────────
    async fn get_latest_profile(&self) -> Result<Option<TapestryProfile>, ProtoError>;
    async fn save_profile(&self, profile: TapestryProfile) -> Result<(), ProtoError>;
}
