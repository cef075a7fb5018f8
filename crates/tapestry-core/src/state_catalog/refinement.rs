//! State graph for the `refinement` category (spec §4.5.2/§6):
//!
//! ```text
//! REFINEMENT_CREATED(seed_ids)
//!   -> REFINEMENT_DISCOVER(clusters)     [union-find over seeds, §4.7]
//!   -> REFINEMENT_PENDING(job_key)       [submit one prompt per cluster]
//!   -> REFINEMENT_PENDING(job_key)       [poll; same-kind bump]
//!   -> REFINEMENT_COMPLETE(...)          [write refined rows, supersede inputs]
//!   -> REFINEMENT_EMBED_PENDING(job_key)
//!   -> REFINEMENT_EMBED_PENDING(job_key) [same-kind bump]
//!   -> REFINEMENT_EMBED_COMPLETE(count)
//!   -> COMPLETE
//! ```
//!
//! Grounded on `context_use/memories/refinement/states.py`. Cluster
//! membership is flattened to `Vec<Vec<String>>` rather than the original's
//! `dict[str, list[str]]`, per spec §9's Open Question resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapestry_proto::{State, StateKind};

use super::CategoryState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RefinementState {
    #[serde(rename = "REFINEMENT_CREATED")]
    RefinementCreated {
        seed_memory_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "REFINEMENT_DISCOVER")]
    Discover {
        clusters: Vec<Vec<String>>,
        cluster_count: u64,
        discovered_at: DateTime<Utc>,
    },

    #[serde(rename = "REFINEMENT_PENDING")]
    Pending {
        job_key: String,
        poll_count: u32,
        submitted_at: DateTime<Utc>,
    },

    #[serde(rename = "REFINEMENT_COMPLETE")]
    Complete {
        completed_at: DateTime<Utc>,
        refined_count: u64,
        superseded_count: u64,
        created_memory_ids: Vec<String>,
    },

    #[serde(rename = "REFINEMENT_EMBED_PENDING")]
    EmbedPending {
        job_key: String,
        poll_count: u32,
        submitted_at: DateTime<Utc>,
    },

    #[serde(rename = "REFINEMENT_EMBED_COMPLETE")]
    EmbedComplete {
        completed_at: DateTime<Utc>,
        embedded_count: u64,
    },

    #[serde(rename = "COMPLETE")]
    Terminal { completed_at: DateTime<Utc> },

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

impl RefinementState {
    pub fn refinement_created(seed_memory_ids: Vec<String>) -> Self {
        Self::RefinementCreated {
            seed_memory_ids,
            timestamp: Utc::now(),
        }
    }

    pub fn discover(clusters: Vec<Vec<String>>) -> Self {
        Self::Discover {
            cluster_count: clusters.len() as u64,
            clusters,
            discovered_at: Utc::now(),
        }
    }

    pub fn pending(job_key: String) -> Self {
        Self::Pending {
            job_key,
            poll_count: 0,
            submitted_at: Utc::now(),
        }
    }

    pub fn complete(refined_count: u64, superseded_count: u64, created_memory_ids: Vec<String>) -> Self {
        Self::Complete {
            completed_at: Utc::now(),
            refined_count,
            superseded_count,
            created_memory_ids,
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

    pub fn terminal() -> Self {
        Self::Terminal { completed_at: Utc::now() }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            skipped_at: Utc::now(),
            reason: reason.into(),
        }
    }
}

impl State for RefinementState {
    fn status(&self) -> &'static str {
        match self {
            Self::RefinementCreated { .. } => "REFINEMENT_CREATED",
            Self::Discover { .. } => "REFINEMENT_DISCOVER",
            Self::Pending { .. } => "REFINEMENT_PENDING",
            Self::Complete { .. } => "REFINEMENT_COMPLETE",
            Self::EmbedPending { .. } => "REFINEMENT_EMBED_PENDING",
            Self::EmbedComplete { .. } => "REFINEMENT_EMBED_COMPLETE",
            Self::Terminal { .. } => "COMPLETE",
            Self::Skipped { .. } => "SKIPPED",
            Self::Failed { .. } => "FAILED",
        }
    }

    fn kind(&self) -> StateKind {
        match self {
            Self::RefinementCreated { .. }
            | Self::Discover { .. }
            | Self::Complete { .. }
            | Self::EmbedComplete { .. } => StateKind::Transition,
            Self::Pending { .. } | Self::EmbedPending { .. } => StateKind::Polling,
            Self::Terminal { .. } | Self::Skipped { .. } | Self::Failed { .. } => {
                StateKind::Terminal
            }
        }
    }

    fn countdown(&self) -> Option<u64> {
        match self {
            Self::Pending { .. } | Self::EmbedPending { .. } => Some(crate::config::jittered_countdown(
                crate::config::REFINEMENT_POLL_BASE_SECS,
                crate::config::POLL_JITTER_SECS,
            )),
            _ => None,
        }
    }

    fn poll_count(&self) -> Option<u32> {
        match self {
            Self::Pending { poll_count, .. } | Self::EmbedPending { poll_count, .. } => {
                Some(*poll_count)
            }
            _ => None,
        }
    }
}

impl CategoryState for RefinementState {
    const CATEGORY: &'static str = "refinement";

    fn failed(error_message: String, previous_status: String) -> Self {
        Self::Failed {
            error_message,
            failed_at: Utc::now(),
            previous_status,
        }
    }

    fn countdown_with(&self, config: &crate::config::CountdownConfig) -> Option<u64> {
        match self {
            Self::Pending { .. } | Self::EmbedPending { .. } => Some(config.jittered()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_discover_with_flattened_clusters() {
        let s = RefinementState::discover(vec![vec!["m1".into(), "m2".into()]]);
        let parsed = RefinementState::parse(&s.to_value()).unwrap();
        assert_eq!(s, parsed);
    }

    #[test]
    fn terminal_variant_tags_as_complete() {
        let s = RefinementState::terminal();
        assert_eq!(s.status(), "COMPLETE");
        assert!(s.is_terminal());
    }

    #[test]
    fn pending_is_polling() {
        let s = RefinementState::pending("job-1".into());
        assert_eq!(s.kind(), StateKind::Polling);
        assert_eq!(s.poll_count(), Some(0));
    }
}
