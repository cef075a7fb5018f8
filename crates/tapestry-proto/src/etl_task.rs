//! `EtlTask` — one discovered processing unit inside an archive (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlTaskStatus {
    Created,
    Extracting,
    Transforming,
    Uploading,
    Completed,
    Failed,
}

/// One discovered processing unit inside an archive: a single provider,
/// interaction type, and set of source URIs run through extract/transform/
/// upload.
///
/// `source_uris` generalizes the original implementation's single
/// `source_uri` field to a non-empty sorted list, per spec §3's invariant;
/// the single-URI case is simply a list of length one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlTask {
    pub id: String,
    pub archive_id: String,
    pub provider: String,
    pub interaction_type: String,
    pub source_uris: Vec<String>,
    pub status: EtlTaskStatus,
    pub extracted_count: u64,
    pub transformed_count: u64,
    pub uploaded_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EtlTask {
    pub fn new(
        archive_id: impl Into<String>,
        provider: impl Into<String>,
        interaction_type: impl Into<String>,
        mut source_uris: Vec<String>,
    ) -> Self {
        assert!(!source_uris.is_empty(), "EtlTask requires at least one source URI");
        source_uris.sort();
        let now = Utc::now();
        Self {
            id: generate_id(),
            archive_id: archive_id.into(),
            provider: provider.into(),
            interaction_type: interaction_type.into(),
            source_uris,
            status: EtlTaskStatus::Created,
            extracted_count: 0,
            transformed_count: 0,
            uploaded_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant: `extracted_count >= transformed_count >= uploaded_count`.
    pub fn counts_consistent(&self) -> bool {
        self.extracted_count >= self.transformed_count
            && self.transformed_count >= self.uploaded_count
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, EtlTaskStatus::Completed | EtlTaskStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_source_uris() {
        let t = EtlTask::new(
            "arc-1",
            "chatgpt",
            "chat_message",
            vec!["b.json".into(), "a.json".into()],
        );
        assert_eq!(t.source_uris, vec!["a.json".to_string(), "b.json".to_string()]);
    }

    #[test]
    fn counts_consistency_invariant() {
        let mut t = EtlTask::new("arc-1", "chatgpt", "chat_message", vec!["a.json".into()]);
        t.extracted_count = 10;
        t.transformed_count = 5;
        t.uploaded_count = 2;
        assert!(t.counts_consistent());
        t.uploaded_count = 11;
        assert!(!t.counts_consistent());
    }

    #[test]
    #[should_panic]
    fn rejects_empty_source_uris() {
        EtlTask::new("arc-1", "chatgpt", "chat_message", vec![]);
    }
}
