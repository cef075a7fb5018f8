//! `Batch` and `BatchThread` — the orchestration unit and its linkage to
//! threads (spec §3/§4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::generate_id;

/// A pipeline family that fixes the state algebra and manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchCategory {
    Memories,
    Refinement,
    /// Pre-filtering stage that narrows raw threads to the subset worth an
    /// LLM call before the `memories` category groups and runs them.
    MemoryCandidates,
}

impl BatchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchCategory::Memories => "memories",
            BatchCategory::Refinement => "refinement",
            BatchCategory::MemoryCandidates => "memory_candidates",
        }
    }
}

/// The unit of orchestration: one instance of a state machine.
///
/// `states` is a stack of persisted state records with the current state at
/// index 0; it is never empty once created. Each record is `{status: ...,
/// ...variant-specific fields}` — the category-specific parser in
/// `tapestry-core::state_catalog` turns a record into a concrete state
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub batch_number: u32,
    pub category: BatchCategory,
    pub states: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(batch_number: u32, category: BatchCategory, initial_state: Value) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            batch_number,
            category,
            states: vec![initial_state],
            created_at: now,
            updated_at: now,
        }
    }

    /// The current (head) state record. Batches are never constructed with
    /// an empty stack, so this is always present.
    pub fn current_state(&self) -> &Value {
        self.states.first().expect("batch states stack is never empty")
    }

    /// Pushes a new state record per the stack semantics in spec §4.4: if
    /// the incoming record's `status` tag equals the current head's, it
    /// replaces the head in place (a polling/retry bump); otherwise it is
    /// prepended as a new transition.
    pub fn push_state(&mut self, next: Value) {
        let same_tag = self
            .current_state()
            .get("status")
            .and_then(Value::as_str)
            .zip(next.get("status").and_then(Value::as_str))
            .is_some_and(|(a, b)| a == b);

        if same_tag {
            self.states[0] = next;
        } else {
            self.states.insert(0, next);
        }
        self.updated_at = Utc::now();
    }
}

/// Many-to-many linkage from a batch to its threads, carrying the group id
/// so group membership survives restarts. Deleting a batch must not delete
/// the threads it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchThread {
    pub batch_id: String,
    pub thread_id: String,
    pub group_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_batch_has_one_state_at_head() {
        let b = Batch::new(1, BatchCategory::Memories, json!({"status": "CREATED"}));
        assert_eq!(b.states.len(), 1);
        assert_eq!(b.current_state(), &json!({"status": "CREATED"}));
    }

    #[test]
    fn push_state_replaces_head_on_same_status_tag() {
        let mut b = Batch::new(
            1,
            BatchCategory::Memories,
            json!({"status": "MEMORY_GENERATE_PENDING", "poll_count": 3}),
        );
        b.push_state(json!({"status": "MEMORY_GENERATE_PENDING", "poll_count": 4}));
        assert_eq!(b.states.len(), 1);
        assert_eq!(b.states[0]["poll_count"], 4);
    }

    #[test]
    fn push_state_prepends_on_different_status_tag() {
        let mut b = Batch::new(1, BatchCategory::Memories, json!({"status": "CREATED"}));
        b.push_state(json!({"status": "MEMORY_GENERATE_PENDING", "poll_count": 0}));
        assert_eq!(b.states.len(), 2);
        assert_eq!(b.states[0]["status"], "MEMORY_GENERATE_PENDING");
        assert_eq!(b.states[1]["status"], "CREATED");
    }
}
