//! State graph for the `memories` category (spec §4.5.1/§6):
//!
//! ```text
//! CREATED
//!   -> MEMORY_GENERATE_PENDING  [submit LLM completion batch]
//!   -> MEMORY_GENERATE_PENDING  [poll; same kind -> bump poll_count]
//!   -> MEMORY_GENERATE_COMPLETE [results available; write memory rows]
//!   -> MEMORY_EMBED_PENDING     [submit LLM embed batch over new rows]
//!   -> MEMORY_EMBED_PENDING     [poll; same-kind bump]
//!   -> MEMORY_EMBED_COMPLETE    [attach vectors to rows]
//!   -> COMPLETE
//! ```
//!
//! Grounded on `context_use/memories/states.py`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapestry_proto::{State, StateKind};

use super::CategoryState;

/// `MEMORY_GENERATE_COMPLETE` carries `memory_ids` in addition to spec §6's
/// `completed_at`/`memories_count` pair: the embedding step needs a concrete
/// id list to hand `Store::get_unembedded_memories`, and the store contract
/// (spec §4.8) has no "every unembedded row" query — only an id-scoped one.
/// This is a recovered gap, not a field drop: the original looks up
/// unembedded rows by `tapestry_id` instead, a filter our `Store` contract
/// does not expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum MemoriesState {
    #[serde(rename = "CREATED")]
    Created { timestamp: DateTime<Utc> },

    #[serde(rename = "MEMORY_GENERATE_PENDING")]
    GeneratePending {
        job_key: String,
        poll_count: u32,
        submitted_at: DateTime<Utc>,
    },

    #[serde(rename = "MEMORY_GENERATE_COMPLETE")]
    GenerateComplete {
        completed_at: DateTime<Utc>,
        memories_count: u64,
        memory_ids: Vec<String>,
    },

    #[serde(rename = "MEMORY_EMBED_PENDING")]
    EmbedPending {
        job_key: String,
        poll_count: u32,
        submitted_at: DateTime<Utc>,
    },

    #[serde(rename = "MEMORY_EMBED_COMPLETE")]
    EmbedComplete {
        completed_at: DateTime<Utc>,
        embedded_count: u64,
    },

    #[serde(rename = "COMPLETE")]
    Complete { completed_at: DateTime<Utc> },

    #[serde(rename = "SKIPPED")]
    Skipped {
        skipped_at: DateTime<Utc>,
        reason: String,
    },

    #[serde(rename = "FAILED")]
    Failed {
        error_message: String,
        failed_at: DateTime<Utc>,
        previous_status: String,
    },
}

impl MemoriesState {
    pub fn created() -> Self {
        Self::Created { timestamp: Utc::now() }
    }

    pub fn generate_pending(job_key: String) -> Self {
        Self::GeneratePending {
            job_key,
            poll_count: 0,
            submitted_at: Utc::now(),
        }
    }

    pub fn generate_complete(memory_ids: Vec<String>) -> Self {
        Self::GenerateComplete {
            completed_at: Utc::now(),
            memories_count: memory_ids.len() as u64,
            memory_ids,
        }
    }

    pub fn embed_pending(job_key: String) -> Self {
        Self::EmbedPending {
            job_key,
            poll_count: 0,
            submitted_at: Utc::now(),
        }
    }

    pub fn embed_complete(embedded_count: u64) -> Self {
        Self::EmbedComplete {
            completed_at: Utc::now(),
            embedded_count,
        }
    }

    pub fn complete() -> Self {
        Self::Complete { completed_at: Utc::now() }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            skipped_at: Utc::now(),
            reason: reason.into(),
        }
    }
}

impl State for MemoriesState {
    fn status(&self) -> &'static str {
        match self {
            Self::Created { .. } => "CREATED",
            Self::GeneratePending { .. } => "MEMORY_GENERATE_PENDING",
            Self::GenerateComplete { .. } => "MEMORY_GENERATE_COMPLETE",
            Self::EmbedPending { .. } => "MEMORY_EMBED_PENDING",
            Self::EmbedComplete { .. } => "MEMORY_EMBED_COMPLETE",
            Self::Complete { .. } => "COMPLETE",
            Self::Skipped { .. } => "SKIPPED",
            Self::Failed { .. } => "FAILED",
        }
    }

    fn kind(&self) -> StateKind {
        match self {
            Self::Created { .. } | Self::GenerateComplete { .. } | Self::EmbedComplete { .. } => {
                StateKind::Transition
            }
            Self::GeneratePending { .. } | Self::EmbedPending { .. } => StateKind::Polling,
            Self::Complete { .. } | Self::Skipped { .. } | Self::Failed { .. } => {
                StateKind::Terminal
            }
        }
    }

    fn countdown(&self) -> Option<u64> {
        match self {
            Self::GeneratePending { .. } | Self::EmbedPending { .. } => Some(
                crate::config::jittered_countdown(
                    crate::config::MEMORIES_POLL_BASE_SECS,
                    crate::config::POLL_JITTER_SECS,
                ),
            ),
            _ => None,
        }
    }

    fn poll_count(&self) -> Option<u32> {
        match self {
            Self::GeneratePending { poll_count, .. } | Self::EmbedPending { poll_count, .. } => {
                Some(*poll_count)
            }
            _ => None,
        }
    }
}

impl CategoryState for MemoriesState {
    const CATEGORY: &'static str = "memories";

    fn failed(error_message: String, previous_status: String) -> Self {
        Self::Failed {
            error_message,
            failed_at: Utc::now(),
            previous_status,
        }
    }

    fn countdown_with(&self, config: &crate::config::CountdownConfig) -> Option<u64> {
        match self {
            Self::GeneratePending { .. } | Self::EmbedPending { .. } => Some(config.jittered()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_generate_pending() {
        let s = MemoriesState::generate_pending("job-1".into());
        let value = s.to_value();
        let parsed = MemoriesState::parse(&value).unwrap();
        assert_eq!(s, parsed);
    }

    #[test]
    fn unknown_status_is_data_validation_error() {
        let err = MemoriesState::parse(&json!({"status": "NOPE"})).unwrap_err();
        assert!(matches!(err, crate::error::OrchestratorError::DataValidation(_)));
    }

    #[test]
    fn generate_pending_is_polling_with_countdown() {
        let s = MemoriesState::generate_pending("job-1".into());
        assert_eq!(s.kind(), StateKind::Polling);
        assert!(s.countdown().is_some());
        assert_eq!(s.poll_count(), Some(0));
    }

    #[test]
    fn complete_is_terminal() {
        assert!(MemoriesState::complete().is_terminal());
        assert!(MemoriesState::skipped("no groups").is_terminal());
    }
}
