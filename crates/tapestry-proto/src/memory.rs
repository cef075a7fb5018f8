//! `TapestryMemory` and `TapestryProfile` (spec §3), plus the
//! `MemorySearchResult` value recovered from `store.base.MemorySearchResult`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::generate_id;

/// Fixed embedding dimension matching the intended embedding provider.
/// Implementations must reject mismatches at ingest.
pub const EMBEDDING_DIMENSIONS: usize = 3072;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Active,
    Superseded,
}

/// A memory row. Invariant: a memory with `status = Superseded` has exactly
/// one `superseded_by` pointing to an active memory whose
/// `source_memory_ids` contains this row's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapestryMemory {
    pub id: String,
    pub content: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub group_id: String,
    pub embedding: Option<Vec<f32>>,
    pub status: MemoryStatus,
    pub superseded_by: Option<String>,
    pub source_memory_ids: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl TapestryMemory {
    pub fn new(content: impl Into<String>, from_date: NaiveDate, to_date: NaiveDate, group_id: impl Into<String>) -> Self {
        assert!(from_date <= to_date, "from_date must not be after to_date");
        Self {
            id: generate_id(),
            content: content.into(),
            from_date,
            to_date,
            group_id: group_id.into(),
            embedding: None,
            status: MemoryStatus::Active,
            superseded_by: None,
            source_memory_ids: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this memory carries an embedding of the expected dimension.
    pub fn has_valid_embedding(&self) -> bool {
        self.embedding
            .as_ref()
            .is_some_and(|v| v.len() == EMBEDDING_DIMENSIONS)
    }

    /// Refinable per §4.7/§4.8: active, embedded, and not itself a refined
    /// output (`source_memory_ids` is null).
    pub fn is_refinable(&self) -> bool {
        self.status == MemoryStatus::Active
            && self.embedding.is_some()
            && self.source_memory_ids.is_none()
    }
}

/// Result of `Store::search_memories`, carrying an optional similarity
/// score (`None` when the query was not embedding-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchResult {
    pub id: String,
    pub content: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub similarity: Option<f32>,
}

/// One generated profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapestryProfile {
    pub id: String,
    pub content: String,
    pub generated_at: DateTime<Utc>,
    pub memory_count: u64,
}

impl TapestryProfile {
    pub fn new(content: impl Into<String>, memory_count: u64) -> Self {
        Self {
            id: generate_id(),
            content: content.into(),
            generated_at: Utc::now(),
            memory_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    #[should_panic]
    fn rejects_inverted_date_range() {
        TapestryMemory::new("x", date("2024-01-05"), date("2024-01-01"), "g1");
    }

    #[test]
    fn refinable_requires_active_embedded_unrefined() {
        let mut m = TapestryMemory::new("x", date("2024-01-01"), date("2024-01-05"), "g1");
        assert!(!m.is_refinable());
        m.embedding = Some(vec![0.0; EMBEDDING_DIMENSIONS]);
        assert!(m.is_refinable());
        m.source_memory_ids = Some(vec!["other".into()]);
        assert!(!m.is_refinable());
    }

    #[test]
    fn embedding_dimension_validation() {
        let mut m = TapestryMemory::new("x", date("2024-01-01"), date("2024-01-01"), "g1");
        m.embedding = Some(vec![0.0; 10]);
        assert!(!m.has_valid_embedding());
        m.embedding = Some(vec![0.0; EMBEDDING_DIMENSIONS]);
        assert!(m.has_valid_embedding());
    }
}
