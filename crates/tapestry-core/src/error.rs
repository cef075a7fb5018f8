//! `OrchestratorError` — the error taxonomy for batch managers (spec §7).

use thiserror::Error;
use tapestry_proto::ProtoError;

/// The four error kinds spec §7 names. `Skip` is deliberately absent: a
/// skip is not an error, it is the `SKIPPED` terminal state value.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Transient external failure (network blip on LLM poll, store
    /// connection hiccup). Propagated, not auto-retried; the reliability
    /// story is resumption after process restart, not in-process retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Terminal external failure: the LLM job itself returned
    /// `failed | cancelled | expired`.
    #[error("terminal failure: {0}")]
    Terminal(String),

    /// Schema mismatch on LLM output, malformed archive record, or any
    /// other fatal data-shape problem.
    #[error("data validation failed: {0}")]
    DataValidation(String),

    /// Missing registered parser, unknown category. Raised synchronously
    /// at configuration time, never during a running batch.
    #[error("precondition violation: {0}")]
    Precondition(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl OrchestratorError {
    /// The message persisted as a `FAILED` state's `error_message`.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
