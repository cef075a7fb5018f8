//! Error taxonomy shared by the store and LLM client contracts.

use thiserror::Error;

/// Errors surfaced across the `tapestry-proto` contract boundaries.
///
/// Mirrors the teacher's `MergeQueueError` shape: one variant per failure
/// mode, each convertible from its underlying cause via `#[from]`.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown state status tag `{0}` for category `{1}`")]
    UnknownStatus(String, &'static str),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("precondition violation: {0}")]
    Precondition(String),

    #[error("llm job failed: {0}")]
    LlmJobFailed(String),

    #[error("data validation failed: {0}")]
    DataValidation(String),
}
