//! The generic batch manager driver (spec §4.4): `try_advance_state`
//! implemented once, parameterized over a category's state type and its
//! `_transition` hook, rather than once per category as the Python original
//! does via class inheritance (spec §9's "polymorphic managers" note).
//!
//! Grounded on `context_use/batch/manager.py`'s `BaseBatchManager`.

use std::mem::discriminant;

use async_trait::async_trait;
use tapestry_proto::{Batch, ScheduleInstruction, State, StateKind, Store};
use tracing::{error, info};

use crate::config::{BatchConfig, CountdownConfig};
use crate::error::OrchestratorError;
use crate::state_catalog::CategoryState;

/// Object-safe wrapper every per-category manager implements, so the
/// runner can hold `Vec<Box<dyn BatchManager>>` without knowing concrete
/// state types.
#[async_trait]
pub trait BatchManager: Send + Sync {
    async fn try_advance_state(&mut self) -> Result<ScheduleInstruction, OrchestratorError>;
}

/// The one hook a category supplies: current state in, next state (or
/// `None` to stop) out. Side effects on the store and the LLM client
/// happen here; `advance` owns the transactional and bookkeeping concerns
/// wrapped around this single hook.
#[async_trait]
pub trait Transition<S: CategoryState>: Send + Sync {
    async fn transition(&self, current: &S) -> Result<Option<S>, OrchestratorError>;
}

/// Implements spec §4.4's numbered algorithm in full: re-read the batch,
/// parse its current state, call the transition hook, bump poll/retry
/// counters when the next state is the same concrete variant as the
/// current one (capped at `limits.max_poll_attempts`/`max_retry_attempts`),
/// push the result onto the state stack, and persist. A transition error is
/// caught and converted into a `FAILED` state in its own fresh read of the
/// batch, matching the "new atomic section" spec §4.4 requires for the
/// failure path.
pub async fn advance<S, T>(
    batch_id: &str,
    store: &dyn Store,
    limits: &BatchConfig,
    countdown: &CountdownConfig,
    transition: &T,
) -> Result<ScheduleInstruction, OrchestratorError>
where
    S: CategoryState,
    T: Transition<S>,
{
    let Some(batch) = store.get_batch(batch_id).await? else {
        return Ok(ScheduleInstruction::stop());
    };

    let current = S::parse(batch.current_state())?;
    let previous_status = current.status().to_string();

    match run_transition(batch, current, limits, countdown, transition, store).await {
        Ok(instruction) => Ok(instruction),
        Err(err) => {
            error!(batch_id, error = %err, "batch transition failed");
            capture_failure::<S>(batch_id, store, &err, previous_status).await?;
            Ok(ScheduleInstruction::stop())
        }
    }
}

async fn run_transition<S, T>(
    mut batch: Batch,
    current: S,
    limits: &BatchConfig,
    countdown: &CountdownConfig,
    transition: &T,
    store: &dyn Store,
) -> Result<ScheduleInstruction, OrchestratorError>
where
    S: CategoryState,
    T: Transition<S>,
{
    let current_discriminant = discriminant(&current);
    let current_poll_count = current.poll_count();
    let current_retry_count = current.retry_count();

    let Some(next) = transition.transition(&current).await? else {
        return Ok(ScheduleInstruction::stop());
    };

    let final_state = if discriminant(&next) == current_discriminant {
        match next.kind() {
            StateKind::Polling => {
                let poll_count = current_poll_count.unwrap_or(0) + 1;
                if poll_count >= limits.max_poll_attempts {
                    return Err(OrchestratorError::Transient(format!(
                        "poll attempts exceeded ({poll_count} >= {})",
                        limits.max_poll_attempts
                    )));
                }
                info!(poll_count, status = next.status(), "polling attempt");
                with_counter_field(next, "poll_count", poll_count)?
            }
            StateKind::Retry => {
                let retry_count = current_retry_count.unwrap_or(0) + 1;
                if retry_count > limits.max_retry_attempts {
                    return Err(OrchestratorError::Transient(format!(
                        "retry attempts exceeded ({retry_count} > {})",
                        limits.max_retry_attempts
                    )));
                }
                info!(retry_count, status = next.status(), "retry attempt");
                with_counter_field(next, "retry_count", retry_count)?
            }
            StateKind::Transition | StateKind::Terminal => next,
        }
    } else {
        next
    };

    let instruction = instruction_for(&final_state, countdown);
    batch.push_state(final_state.to_value());
    store.update_batch(batch).await?;
    Ok(instruction)
}

/// Same conversion table as `ScheduleInstruction::from_state`, except a
/// `Polling`/`Retry` countdown comes from the category's configured
/// base/jitter rather than `State::countdown`'s compile-time constant.
fn instruction_for<S: CategoryState>(state: &S, countdown: &CountdownConfig) -> ScheduleInstruction {
    match state.kind() {
        StateKind::Terminal => ScheduleInstruction::stop(),
        StateKind::Polling | StateKind::Retry => {
            ScheduleInstruction::sleep(state.countdown_with(countdown).unwrap_or(0))
        }
        StateKind::Transition => ScheduleInstruction::advance_now(),
    }
}

/// Rewrites one counter field on a state's JSON record and re-parses it,
/// avoiding the need for per-variant bump methods on `CategoryState`: every
/// `Polling`/`Retry` variant already carries `poll_count`/`retry_count` per
/// spec §6's field table.
fn with_counter_field<S: CategoryState>(
    state: S,
    field: &str,
    value: u32,
) -> Result<S, OrchestratorError> {
    let mut record = state.to_value();
    record[field] = serde_json::json!(value);
    S::parse(&record)
}

async fn capture_failure<S: CategoryState>(
    batch_id: &str,
    store: &dyn Store,
    err: &OrchestratorError,
    previous_status: String,
) -> Result<(), OrchestratorError> {
    let Some(mut batch) = store.get_batch(batch_id).await? else {
        return Ok(());
    };
    let failed = S::failed(err.message(), previous_status);
    batch.push_state(failed.to_value());
    store.update_batch(batch).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_catalog::MemoriesState;
    use crate::store::InMemoryStore;
    use tapestry_proto::BatchCategory;

    struct StillPolling;

    #[async_trait]
    impl Transition<MemoriesState> for StillPolling {
        async fn transition(
            &self,
            current: &MemoriesState,
        ) -> Result<Option<MemoriesState>, OrchestratorError> {
            Ok(Some(current.clone()))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Transition<MemoriesState> for AlwaysFails {
        async fn transition(
            &self,
            _current: &MemoriesState,
        ) -> Result<Option<MemoriesState>, OrchestratorError> {
            Err(OrchestratorError::DataValidation("boom".into()))
        }
    }

    async fn seed_batch(store: &InMemoryStore, state: serde_json::Value) -> String {
        let batch = Batch::new(1, BatchCategory::Memories, state);
        let created = store.create_batch(batch, &[]).await.unwrap();
        created.id
    }

    #[tokio::test]
    async fn poll_bump_replaces_head_in_place() {
        let store = InMemoryStore::new();
        let pending = MemoriesState::generate_pending("job-1".into());
        let batch_id = seed_batch(&store, pending.to_value()).await;
        let limits = BatchConfig::default();
        let countdown = CountdownConfig::default();

        let instruction = advance::<MemoriesState, _>(&batch_id, &store, &limits, &countdown, &StillPolling)
            .await
            .unwrap();

        assert!(!instruction.stop);
        let batch = store.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.states.len(), 1);
        assert_eq!(batch.states[0]["poll_count"], 1);
    }

    #[tokio::test]
    async fn transition_error_is_captured_as_failed() {
        let store = InMemoryStore::new();
        let batch_id = seed_batch(&store, MemoriesState::created().to_value()).await;
        let limits = BatchConfig::default();
        let countdown = CountdownConfig::default();

        let instruction = advance::<MemoriesState, _>(&batch_id, &store, &limits, &countdown, &AlwaysFails)
            .await
            .unwrap();

        assert!(instruction.stop);
        let batch = store.get_batch(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.states[0]["status"], "FAILED");
        assert_eq!(batch.states[0]["previous_status"], "CREATED");
    }

    #[tokio::test]
    async fn missing_batch_stops_without_error() {
        let store = InMemoryStore::new();
        let limits = BatchConfig::default();
        let countdown = CountdownConfig::default();
        let instruction = advance::<MemoriesState, _>("does-not-exist", &store, &limits, &countdown, &StillPolling)
            .await
            .unwrap();
        assert!(instruction.stop);
    }
}
