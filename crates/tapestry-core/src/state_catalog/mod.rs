//! The state catalog (spec §4.3): per-category tagged state enums plus the
//! shared `CategoryState` trait the generic `batch_manager` driver needs to
//! round-trip a state through JSON and bump poll/retry counters.
//!
//! Grounded on `context_use/memories/states.py` and
//! `context_use/memories/refinement/states.py`'s per-category `_state_map`
//! registries, reshaped as Rust tagged enums (`#[serde(tag = "status")]`)
//! rather than a dict of Pydantic classes, matching the teacher's
//! `MergeEventType` convention (`merge_queue.rs`).

pub mod candidates;
pub mod memories;
pub mod refinement;

pub use candidates::MemoryCandidatesState;
pub use memories::MemoriesState;
pub use refinement::RefinementState;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tapestry_proto::State;

use crate::config::CountdownConfig;
use crate::error::OrchestratorError;

/// A category's concrete state enum: JSON round-trip plus the counter-bump
/// operations `batch_manager::advance` needs, on top of the base `State`
/// trait every variant already implements.
pub trait CategoryState: State + Serialize + DeserializeOwned + Clone + Sized {
    /// The `status` tag registered at config time; unknown tags are a
    /// `Precondition` violation per spec §7.
    const CATEGORY: &'static str;

    /// Parses a persisted state record. An unrecognized `status` tag is a
    /// fatal error (spec §4.3).
    fn parse(record: &Value) -> Result<Self, OrchestratorError> {
        serde_json::from_value(record.clone())
            .map_err(|e| OrchestratorError::DataValidation(format!("{}: {e}", Self::CATEGORY)))
    }

    /// Serializes back to the persisted record shape.
    fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("state values always serialize")
    }

    /// Builds the `FAILED` terminal variant persisted when a transition
    /// throws (spec §4.4's catch-all step).
    fn failed(error_message: String, previous_status: String) -> Self;

    /// Countdown for a `Polling`/`Retry` state, honoring a caller-supplied
    /// base/jitter rather than `State::countdown`'s compile-time constant —
    /// so a `CoreConfig` loaded from YAML actually changes the sleep.
    /// `None` for `Transition`/`Terminal` states. Defaults to the `State`
    /// trait's hardcoded countdown for categories with no configured base.
    fn countdown_with(&self, _config: &CountdownConfig) -> Option<u64> {
        self.countdown()
    }
}
