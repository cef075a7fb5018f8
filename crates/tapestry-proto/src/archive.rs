//! `Archive` — external raw import (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::generate_id;

/// Status of an archive. Transitions are monotonic: `Created` may move to
/// `Completed` or `Failed`; neither of those ever moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Created,
    Completed,
    Failed,
}

/// One externally-provided raw import (e.g. a ChatGPT or Instagram export).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub id: String,
    pub provider: String,
    pub status: ArchiveStatus,
    /// Storage keys written during unzip, so re-running discovery does not
    /// need to re-list storage.
    pub file_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Archive {
    pub fn new(provider: impl Into<String>, file_uris: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            provider: provider.into(),
            status: ArchiveStatus::Created,
            file_uris,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the status has reached a terminal value.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ArchiveStatus::Completed | ArchiveStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_archive_starts_created_and_non_terminal() {
        let a = Archive::new("chatgpt", vec!["s3://bucket/a.zip".into()]);
        assert_eq!(a.status, ArchiveStatus::Created);
        assert!(!a.is_terminal());
    }

    #[test]
    fn completed_and_failed_are_terminal() {
        let mut a = Archive::new("instagram", vec![]);
        a.status = ArchiveStatus::Completed;
        assert!(a.is_terminal());
        a.status = ArchiveStatus::Failed;
        assert!(a.is_terminal());
    }
}
