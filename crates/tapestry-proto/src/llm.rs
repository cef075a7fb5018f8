//! The asynchronous LLM job client contract (spec §4.9): submit/poll
//! semantics for completion and embedding batch jobs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProtoError;

/// One completion prompt to submit as part of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptItem {
    pub item_id: String,
    pub prompt: String,
    pub response_schema: Value,
    pub asset_paths: Vec<String>,
}

/// One text to embed as part of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedItem {
    pub item_id: String,
    pub text: String,
}

/// Submit/poll semantics for completion and embedding batch jobs used by
/// the orchestrator.
///
/// `batch_get_results`/`embed_batch_get_results` return `Ok(None)` to mean
/// "still running, poll again"; an `Err` means terminal failure
/// (`failed | cancelled | expired`), which the manager converts to a
/// `FAILED` state.
///
/// A synchronous implementation (no batching, one call per item) is
/// permitted and must preserve this submit/poll shape: submit performs all
/// work eagerly and caches results keyed by a generated job_key; the first
/// poll returns the cached map and clears the cache (`EagerLlmClient` in
/// `tapestry-core` is exactly this).
#[async_trait]
pub trait LlmJobClient: Send + Sync {
    async fn batch_submit(
        &self,
        batch_id: &str,
        items: Vec<PromptItem>,
    ) -> Result<String, ProtoError>;

    async fn batch_get_results(
        &self,
        job_key: &str,
    ) -> Result<Option<HashMap<String, Value>>, ProtoError>;

    async fn embed_batch_submit(
        &self,
        batch_id: &str,
        items: Vec<EmbedItem>,
    ) -> Result<String, ProtoError>;

    async fn embed_batch_get_results(
        &self,
        job_key: &str,
    ) -> Result<Option<HashMap<String, Vec<f32>>>, ProtoError>;
}
