//! `MemoryCandidatesManager` (SPEC_FULL §4.5, SUPPLEMENT): a pre-filtering
//! pass over asset-bearing threads that narrows a batch down to the
//! memory-worthy subset before the `memories` category groups and runs it.
//!
//! Grounded on `context_use/pipelines/memory_candidates/manager.py`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tapestry_proto::{LlmJobClient, PromptItem, Store, TapestryMemory, Thread};
use tracing::info;

use crate::batch_manager::{advance, BatchManager, Transition};
use crate::config::{BatchConfig, CountdownConfig};
use crate::error::OrchestratorError;
use crate::state_catalog::MemoryCandidatesState;

pub struct MemoryCandidatesManager {
    batch_id: String,
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmJobClient>,
    limits: BatchConfig,
    countdown: CountdownConfig,
}

impl MemoryCandidatesManager {
    pub fn new(
        batch_id: impl Into<String>,
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmJobClient>,
        limits: BatchConfig,
        countdown: CountdownConfig,
    ) -> Self {
        Self { batch_id: batch_id.into(), store, llm, limits, countdown }
    }

    async fn asset_threads(&self) -> Result<Vec<Thread>, OrchestratorError> {
        let groups = self.store.get_batch_groups(&self.batch_id).await?;
        Ok(groups
            .into_iter()
            .flat_map(|g| g.threads)
            .filter(|t| t.asset_uri.is_some())
            .collect())
    }

    async fn trigger_generation(&self) -> Result<MemoryCandidatesState, OrchestratorError> {
        let threads = self.asset_threads().await?;
        if threads.is_empty() {
            return Ok(MemoryCandidatesState::skipped("No asset threads for memory generation"));
        }

        info!(batch_id = %self.batch_id, threads = threads.len(), "submitting memory-candidate batch job");
        let prompts = build_day_prompts(&threads);
        let job_key = self.llm.batch_submit(&self.batch_id, prompts).await?;
        Ok(MemoryCandidatesState::generate_pending(job_key))
    }

    async fn check_generation(&self, job_key: &str) -> Result<MemoryCandidatesState, OrchestratorError> {
        let Some(results) = self.llm.batch_get_results(job_key).await? else {
            return Ok(MemoryCandidatesState::generate_pending(job_key.to_string()));
        };

        let count = self.store_candidates(results).await?;
        Ok(MemoryCandidatesState::generate_complete(count))
    }

    async fn store_candidates(&self, results: HashMap<String, Value>) -> Result<u64, OrchestratorError> {
        let mut count = 0u64;
        for (day_key, payload) in results {
            let memory_date = chrono::NaiveDate::parse_from_str(&day_key, "%Y-%m-%d")
                .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;

            let candidates: Vec<Candidate> = serde_json::from_value(
                payload.get("candidates").cloned().unwrap_or(Value::Array(vec![])),
            )
            .map_err(|e| OrchestratorError::DataValidation(e.to_string()))?;

            for candidate in candidates {
                let memory = TapestryMemory::new(candidate.content, memory_date, memory_date, day_key.clone());
                self.store.create_memory(memory).await?;
                count += 1;
            }
        }

        info!(batch_id = %self.batch_id, count, "stored memory candidates");
        Ok(count)
    }
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: String,
}

fn candidate_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "candidates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {"content": {"type": "string"}},
                    "required": ["content"],
                },
            },
        },
        "required": ["candidates"],
    })
}

/// Groups threads by their `asat` calendar day and builds one prompt per
/// day, matching the original's day-keyed `MemoryCandidatePromptBuilder`.
fn build_day_prompts(threads: &[Thread]) -> Vec<PromptItem> {
    let mut by_day: std::collections::BTreeMap<String, Vec<&Thread>> = std::collections::BTreeMap::new();
    for thread in threads {
        by_day.entry(thread.asat.format("%Y-%m-%d").to_string()).or_default().push(thread);
    }

    by_day
        .into_iter()
        .map(|(day, threads)| {
            let mut lines = Vec::new();
            let mut asset_paths = Vec::new();
            for thread in &threads {
                let ts = thread.asat.format("%H:%M");
                if let Some(uri) = &thread.asset_uri {
                    asset_paths.push(uri.clone());
                    lines.push(format!("[{ts}] [Image {}] {}", asset_paths.len(), thread.preview));
                }
            }

            let prompt = format!(
                "You are given posts from {day}. Identify candidate memories worth \
                 keeping as a JSON object with a `candidates` array, each with \
                 `content`.\n\n{}",
                lines.join("\n")
            );

            PromptItem {
                item_id: day.clone(),
                prompt,
                response_schema: candidate_response_schema(),
                asset_paths,
            }
        })
        .collect()
}

#[async_trait]
impl Transition<MemoryCandidatesState> for MemoryCandidatesManager {
    async fn transition(&self, current: &MemoryCandidatesState) -> Result<Option<MemoryCandidatesState>, OrchestratorError> {
        let next = match current {
            MemoryCandidatesState::Created { .. } => self.trigger_generation().await?,
            MemoryCandidatesState::GeneratePending { job_key, .. } => self.check_generation(job_key).await?,
            MemoryCandidatesState::GenerateComplete { .. } => MemoryCandidatesState::complete(),
            MemoryCandidatesState::Complete { .. }
            | MemoryCandidatesState::Skipped { .. }
            | MemoryCandidatesState::Failed { .. } => return Ok(None),
        };
        Ok(Some(next))
    }
}

#[async_trait]
impl BatchManager for MemoryCandidatesManager {
    async fn try_advance_state(&mut self) -> Result<tapestry_proto::ScheduleInstruction, OrchestratorError> {
        advance::<MemoryCandidatesState, Self>(&self.batch_id, self.store.as_ref(), &self.limits, &self.countdown, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn thread(asat: chrono::DateTime<Utc>, asset: Option<&str>) -> Thread {
        Thread {
            id: tapestry_proto::ids::generate_id(),
            unique_key: format!("k-{}", tapestry_proto::ids::generate_id()),
            etl_task_id: "task-1".into(),
            provider: "instagram".into(),
            interaction_type: "post".into(),
            preview: "a post".into(),
            payload: serde_json::json!({}),
            version: "v1".into(),
            asat,
            asset_uri: asset.map(String::from),
            source: None,
            tapestry_id: None,
        }
    }

    #[test]
    fn groups_prompts_by_calendar_day() {
        let threads = vec![
            thread(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(), Some("a.jpg")),
            thread(Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap(), Some("b.jpg")),
            thread(Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap(), Some("c.jpg")),
        ];
        let prompts = build_day_prompts(&threads);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].item_id, "2024-01-01");
        assert_eq!(prompts[0].asset_paths.len(), 2);
        assert_eq!(prompts[1].item_id, "2024-01-02");
    }

    #[tokio::test]
    async fn transitions_to_skipped_without_asset_threads() {
        use crate::store::InMemoryStore;
        use tapestry_proto::{Batch, BatchCategory};

        struct NoopLlm;
        #[async_trait]
        impl LlmJobClient for NoopLlm {
            async fn batch_submit(&self, _: &str, _: Vec<PromptItem>) -> Result<String, tapestry_proto::ProtoError> {
                unreachable!()
            }
            async fn batch_get_results(&self, _: &str) -> Result<Option<HashMap<String, Value>>, tapestry_proto::ProtoError> {
                unreachable!()
            }
            async fn embed_batch_submit(&self, _: &str, _: Vec<tapestry_proto::EmbedItem>) -> Result<String, tapestry_proto::ProtoError> {
                unreachable!()
            }
            async fn embed_batch_get_results(&self, _: &str) -> Result<Option<HashMap<String, Vec<f32>>>, tapestry_proto::ProtoError> {
                unreachable!()
            }
        }

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let batch = store
            .create_batch(Batch::new(1, BatchCategory::MemoryCandidates, serde_json::json!({"status": "CREATED"})), &[])
            .await
            .unwrap();

        let manager = MemoryCandidatesManager::new(
            batch.id,
            store,
            Arc::new(NoopLlm),
            BatchConfig::default(),
            CountdownConfig::memories_default(),
        );
        let next = manager.transition(&MemoryCandidatesState::created()).await.unwrap().unwrap();
        assert!(matches!(next, MemoryCandidatesState::Skipped { .. }));
    }
}
