//! State graph for the `memory_candidates` category (SPEC_FULL §4.5,
//! SUPPLEMENT — recovered from `context_use/pipelines/memory_candidates`,
//! not named in the distilled spec):
//!
//! ```text
//! CREATED -> MEMORY_GENERATE_PENDING -> MEMORY_GENERATE_COMPLETE -> COMPLETE
//! ```
//!
//! Narrower than the `memories` graph: candidates are a pre-filtering pass,
//! so there is no embedding leg. Status tags are reused from the `memories`
//! vocabulary; this is safe because parsing is always category-scoped (the
//! `BatchManager` for a batch already knows its own category).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapestry_proto::{State, StateKind};

use super::CategoryState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum MemoryCandidatesState {
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

impl MemoryCandidatesState {
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

    pub fn generate_complete(memories_count: u64) -> Self {
        Self::GenerateComplete {
            completed_at: Utc::now(),
            memories_count,
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

impl State for MemoryCandidatesState {
    fn status(&self) -> &'static str {
        match self {
            Self::Created { .. } => "CREATED",
            Self::GeneratePending { .. } => "MEMORY_GENERATE_PENDING",
            Self::GenerateComplete { .. } => "MEMORY_GENERATE_COMPLETE",
            Self::Complete { .. } => "COMPLETE",
            Self::Skipped { .. } => "SKIPPED",
            Self::Failed { .. } => "FAILED",
        }
    }

    fn kind(&self) -> StateKind {
        match self {
            Self::Created { .. } | Self::GenerateComplete { .. } => StateKind::Transition,
            Self::GeneratePending { .. } => StateKind::Polling,
            Self::Complete { .. } | Self::Skipped { .. } | Self::Failed { .. } => {
                StateKind::Terminal
            }
        }
    }

    fn countdown(&self) -> Option<u64> {
        match self {
            Self::GeneratePending { .. } => Some(crate::config::jittered_countdown(
                crate::config::MEMORIES_POLL_BASE_SECS,
                crate::config::POLL_JITTER_SECS,
            )),
            _ => None,
        }
    }

    fn poll_count(&self) -> Option<u32> {
        match self {
            Self::GeneratePending { poll_count, .. } => Some(*poll_count),
            _ => None,
        }
    }
}

impl CategoryState for MemoryCandidatesState {
    const CATEGORY: &'static str = "memory_candidates";

    fn failed(error_message: String, previous_status: String) -> Self {
        Self::Failed {
            error_message,
            failed_at: Utc::now(),
            previous_status,
        }
    }

    /// Shares the `memories` countdown base, as its status vocabulary
    /// already borrows from it (see module doc).
    fn countdown_with(&self, config: &crate::config::CountdownConfig) -> Option<u64> {
        match self {
            Self::GeneratePending { .. } => Some(config.jittered()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_generate_complete() {
        let s = MemoryCandidatesState::generate_complete(3);
        let parsed = MemoryCandidatesState::parse(&s.to_value()).unwrap();
        assert_eq!(s, parsed);
    }

    #[test]
    fn created_is_a_transition() {
        assert_eq!(MemoryCandidatesState::created().kind(), StateKind::Transition);
    }
}
