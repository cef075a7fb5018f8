//! Runner / scheduler (spec §4.6): drives one or many batch managers
//! concurrently, honoring countdowns and a global admission policy.
//!
//! Grounded on `context_use/batch/runner.py` and `batch/policy.py`. Uses
//! `tokio::time::sleep` for countdowns and `tokio::task::JoinSet` for
//! `run_batches`, matching the teacher's `tokio`-based async event loop.

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch_manager::BatchManager;
use crate::error::OrchestratorError;

/// Drives a single batch to completion.
pub async fn run_batch(manager: &mut dyn BatchManager) -> Result<(), OrchestratorError> {
    loop {
        let instruction = manager.try_advance_state().await?;
        if instruction.stop {
            return Ok(());
        }
        if instruction.countdown > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(instruction.countdown)).await;
        }
    }
}

/// Runs multiple batch managers concurrently, one `tokio` task per batch.
/// Failures in individual batches are captured in their own `FAILED` state
/// by `try_advance_state` and do not cancel siblings. Returns `true` if
/// every batch ran to completion without an unrecoverable (non-`FAILED`)
/// error escaping its manager.
pub async fn run_batches(managers: Vec<Box<dyn BatchManager>>) -> bool {
    let mut set: JoinSet<bool> = JoinSet::new();
    for mut manager in managers {
        set.spawn(async move {
            match run_batch(manager.as_mut()).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "batch run ended with an unrecoverable error");
                    false
                }
            }
        });
    }
    let mut all_ok = true;
    while let Some(joined) = set.join_next().await {
        all_ok &= joined.unwrap_or(false);
    }
    all_ok
}

/// Controls when and whether a pipeline run should proceed.
#[async_trait]
pub trait RunPolicy: Send + Sync {
    /// Returns a `run_id` if the run is allowed, `None` if rejected (e.g.
    /// another run is already active).
    async fn acquire(&self) -> Option<String>;

    /// Marks a run as finished, successfully or not.
    async fn release(&self, run_id: &str, success: bool);
}

/// Always admits; no locking, no tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateRunPolicy;

#[async_trait]
impl RunPolicy for ImmediateRunPolicy {
    async fn acquire(&self) -> Option<String> {
        Some(Uuid::new_v4().to_string())
    }

    async fn release(&self, _run_id: &str, _success: bool) {}
}

/// Top-level entry point: checks the policy, then runs all batches.
pub async fn run_pipeline(managers: Vec<Box<dyn BatchManager>>, policy: &dyn RunPolicy) {
    let Some(run_id) = policy.acquire().await else {
        info!("pipeline run rejected by policy, skipping");
        return;
    };

    let success = run_batches(managers).await;
    policy.release(&run_id, success).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn immediate_policy_always_admits() {
        let policy = ImmediateRunPolicy;
        assert!(policy.acquire().await.is_some());
    }
}
