//! `Thread` and `ThreadGroup` — normalized interaction records and the
//! transient group value the grouper produces (spec §3/§4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::generate_id;

/// One normalized interaction record.
///
/// `tapestry_id` is an optional tenant/workspace scoping id, recovered from
/// the original `etl.models.thread` module. The spec's worked examples are
/// single-tenant and never require it, but multi-tenant deployments need it
/// to scope `search_memories`/`get_refinable_memory_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub unique_key: String,
    pub etl_task_id: String,
    pub provider: String,
    pub interaction_type: String,
    pub preview: String,
    pub payload: Value,
    pub version: String,
    pub asat: DateTime<Utc>,
    pub asset_uri: Option<String>,
    pub source: Option<String>,
    pub tapestry_id: Option<String>,
}

/// A normalized record as produced by a `Pipe`, not yet assigned a store id.
/// Carries the precomputed `unique_key` so the store can dedup on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRow {
    pub unique_key: String,
    pub provider: String,
    pub interaction_type: String,
    pub preview: String,
    pub payload: Value,
    pub version: String,
    pub asat: DateTime<Utc>,
    pub asset_uri: Option<String>,
    pub source: Option<String>,
    pub tapestry_id: Option<String>,
}

impl ThreadRow {
    /// Materializes a persisted `Thread` from this row, assigning a fresh
    /// id and the owning ETL task.
    pub fn into_thread(self, etl_task_id: impl Into<String>) -> Thread {
        Thread {
            id: generate_id(),
            unique_key: self.unique_key,
            etl_task_id: etl_task_id.into(),
            provider: self.provider,
            interaction_type: self.interaction_type,
            preview: self.preview,
            payload: self.payload,
            version: self.version,
            asat: self.asat,
            asset_uri: self.asset_uri,
            source: self.source,
            tapestry_id: self.tapestry_id,
        }
    }
}

/// A transient grouping of threads produced by a `Grouper`. `group_id` is
/// stable across retries: either an encoded time window `YYYY-MM-DD/YYYY-MM-DD`
/// or an opaque collection id, depending on which grouper produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadGroup {
    pub group_id: String,
    pub threads: Vec<Thread>,
}

impl ThreadGroup {
    pub fn earliest_asat(&self) -> Option<DateTime<Utc>> {
        self.threads.iter().map(|t| t.asat).min()
    }
}
