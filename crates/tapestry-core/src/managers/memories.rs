//! `MemoriesManager` (spec §4.5): extracts memories from grouped threads,
//! then embeds them.
//!
//! Grounded on `context_use/memories/manager.py::MemoryBatchManager` and
//! `context_use/memories/prompt.py::MemoryPromptBuilder`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tapestry_proto::{EmbedItem, LlmJobClient, PromptItem, Store, TapestryMemory, ThreadGroup};
use tracing::info;

use crate::batch_manager::{advance, BatchManager, Transition};
use crate::config::{BatchConfig, CountdownConfig};
use crate::error::OrchestratorError;
use crate::state_catalog::MemoriesState;

pub struct MemoriesManager {
    batch_id: String,
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmJobClient>,
    limits: BatchConfig,
    countdown: CountdownConfig,
}

impl MemoriesManager {
    pub fn new(
        batch_id: impl Into<String>,
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmJobClient>,
        limits: BatchConfig,
        countdown: CountdownConfig,
    ) -> Self {
        Self { batch_id: batch_id.into(), store, llm, limits, countdown }
    }

    async fn trigger_generation(&self) -> Result<MemoriesState, OrchestratorError> {
        let groups = self.store.get_batch_groups(&self.batch_id).await?;
        if groups.is_empty() {
            return Ok(MemoriesState::skipped("No groups for memory generation"));
        }

        let prompts = build_prompts(&groups);
        if prompts.is_empty() {
            return Ok(MemoriesState::skipped("No processable content for memory generation"));
        }

        info!(batch_id = %self.batch_id, groups = groups.len(), prompts = prompts.len(), "submitting memory generation batch");
        let job_key = self.llm.batch_submit(&self.batch_id, prompts).await?;
        Ok(MemoriesState::generate_pending(job_key))
    }

    async fn check_generation(&self, job_key: &str) -> Result<MemoriesState, OrchestratorError> {
        let Some(results) = self.llm.batch_get_results(job_key).await? else {
            return Ok(MemoriesState::generate_pending(job_key.to_string()));
        };

        let memory_ids = self.store_memories(results).await?;
        info!(batch_id = %self.batch_id, stored = memory_ids.len(), "stored memories");
        Ok(MemoriesState::generate_complete(memory_ids))
    }

    async fn store_memories(
        &self,
        results: std::collections::HashMap<String, Value>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut ids = Vec::new();
        for (group_id, payload) in results {
            let memories: Vec<ExtractedMemory> = serde_json::from_value(
                payload.get("memories").cloned().unwrap_or(Value::Array(vec![])),
            )
            .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;

            for memory in memories {
                let from_date = chrono::NaiveDate::parse_from_str(&memory.from_date, "%Y-%m-%d")
                    .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;
                let to_date = chrono::NaiveDate::parse_from_str(&memory.to_date, "%Y-%m-%d")
                    .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;
                let row = TapestryMemory::new(memory.content, from_date, to_date, group_id.clone());
                let created = self.store.create_memory(row).await?;
                ids.push(created.id);
            }
        }
        Ok(ids)
    }

    async fn trigger_embedding(&self, memory_ids: &[String]) -> Result<MemoriesState, OrchestratorError> {
        if memory_ids.is_empty() {
            return Ok(MemoriesState::embed_complete(0));
        }
        let unembedded = self.store.get_unembedded_memories(memory_ids).await?;
        if unembedded.is_empty() {
            return Ok(MemoriesState::embed_complete(0));
        }

        let items = unembedded
            .into_iter()
            .map(|m| EmbedItem { item_id: m.id, text: m.content })
            .collect::<Vec<_>>();

        info!(batch_id = %self.batch_id, count = items.len(), "submitting embed batch");
        let job_key = self.llm.embed_batch_submit(&self.batch_id, items).await?;
        Ok(MemoriesState::embed_pending(job_key))
    }

    async fn check_embedding(&self, job_key: &str) -> Result<MemoriesState, OrchestratorError> {
        let Some(results) = self.llm.embed_batch_get_results(job_key).await? else {
            return Ok(MemoriesState::embed_pending(job_key.to_string()));
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
        info!(batch_id = %self.batch_id, count, "stored embeddings");
        Ok(MemoriesState::embed_complete(count))
    }
}

#[derive(serde::Deserialize)]
struct ExtractedMemory {
    content: String,
    from_date: String,
    to_date: String,
}

fn memory_response_schema() -> Value {
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
                    },
                    "required": ["content", "from_date", "to_date"],
                },
            },
        },
        "required": ["memories"],
    })
}

/// One prompt per group, dispatched the way `get_memory_config` picks
/// between `MediaMemoryPromptBuilder` and `ConversationMemoryPromptBuilder`
/// in the original: a group with any asset-bearing thread goes through the
/// media path, everything else (plain chat transcripts) through the
/// conversation path.
fn build_prompts(groups: &[ThreadGroup]) -> Vec<PromptItem> {
    groups.iter().filter_map(build_group_prompt).collect()
}

fn build_group_prompt(group: &ThreadGroup) -> Option<PromptItem> {
    let with_assets: Vec<_> = group.threads.iter().filter(|t| t.asset_uri.is_some()).collect();
    if with_assets.is_empty() {
        build_conversation_prompt(group)
    } else {
        Some(build_media_prompt(group, &with_assets))
    }
}

/// `MediaMemoryPromptBuilder`'s path: one image-annotated line per
/// asset-bearing thread.
fn build_media_prompt(group: &ThreadGroup, with_assets: &[&tapestry_proto::Thread]) -> PromptItem {
    let (from_date, to_date) = group.group_id.split_once('/').unwrap_or((&group.group_id, &group.group_id));

    let mut lines = Vec::new();
    let mut asset_paths = Vec::new();
    for thread in with_assets {
        let ts = thread.asat.format("%H:%M");
        if let Some(uri) = &thread.asset_uri {
            asset_paths.push(uri.clone());
            lines.push(format!("[{ts}] [Image {}] {}", asset_paths.len(), thread.preview));
        }
    }

    let prompt = format!(
        "You are given posts from {from_date} to {to_date}. Extract the user's \
         vivid, first-person memories from this period as a JSON object with a \
         `memories` array, each with `content`, `from_date`, `to_date`.\n\n{}",
        lines.join("\n")
    );

    PromptItem {
        item_id: group.group_id.clone(),
        prompt,
        response_schema: memory_response_schema(),
        asset_paths,
    }
}

/// `ConversationMemoryPromptBuilder`'s path: a plain transcript of each
/// thread's preview, for text-only providers like `chatgpt_conversations`.
/// Skipped only when the group itself carries no threads.
fn build_conversation_prompt(group: &ThreadGroup) -> Option<PromptItem> {
    if group.threads.is_empty() {
        return None;
    }

    let (from_date, to_date) = group.group_id.split_once('/').unwrap_or((&group.group_id, &group.group_id));

    let lines: Vec<String> = group
        .threads
        .iter()
        .map(|t| format!("[{}] {}", t.asat.format("%Y-%m-%d %H:%M"), t.preview))
        .collect();

    let prompt = format!(
        "You are given a conversation transcript from {from_date} to {to_date}. Extract \
         the user's vivid, first-person memories from this period as a JSON object with \
         a `memories` array, each with `content`, `from_date`, `to_date`.\n\n{}",
        lines.join("\n")
    );

    Some(PromptItem {
        item_id: group.group_id.clone(),
        prompt,
        response_schema: memory_response_schema(),
        asset_paths: Vec::new(),
    })
}

#[async_trait]
impl Transition<MemoriesState> for MemoriesManager {
    async fn transition(&self, current: &MemoriesState) -> Result<Option<MemoriesState>, OrchestratorError> {
        let next = match current {
            MemoriesState::Created { .. } => self.trigger_generation().await?,
            MemoriesState::GeneratePending { job_key, .. } => self.check_generation(job_key).await?,
            MemoriesState::GenerateComplete { memory_ids, .. } => self.trigger_embedding(memory_ids).await?,
            MemoriesState::EmbedPending { job_key, .. } => self.check_embedding(job_key).await?,
            MemoriesState::EmbedComplete { .. } => MemoriesState::complete(),
            MemoriesState::Complete { .. } | MemoriesState::Skipped { .. } | MemoriesState::Failed { .. } => {
                return Ok(None);
            }
        };
        Ok(Some(next))
    }
}

#[async_trait]
impl BatchManager for MemoriesManager {
    async fn try_advance_state(&mut self) -> Result<tapestry_proto::ScheduleInstruction, OrchestratorError> {
        advance::<MemoriesState, Self>(&self.batch_id, self.store.as_ref(), &self.limits, &self.countdown, self).await
    }
}
