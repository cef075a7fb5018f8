//! Configuration types for the batch orchestration core.
//!
//! Nested, `serde`-deserializable structs with `#[serde(default)]` on every
//! field, loadable from YAML via `serde_yaml`, mirroring `RalphConfig`'s
//! shape in the teacher crate.

use serde::{Deserialize, Serialize};

/// Default cap on groups bin-packed into a single batch.
pub const DEFAULT_MAX_GROUPS_PER_BATCH: usize = 50;
/// Polling attempts before a batch is forced into `FAILED`.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 500;
/// Retry attempts before a batch is forced into `FAILED`.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 100;

/// Base poll countdown for the `memories` category (spec §6).
pub const MEMORIES_POLL_BASE_SECS: u64 = 60;
/// Base poll countdown for the `refinement` category (spec §6).
pub const REFINEMENT_POLL_BASE_SECS: u64 = 10;
/// Uniform jitter applied to every pending-state countdown, clamped to >= 0.
pub const POLL_JITTER_SECS: u64 = 10;

/// Applies `±jitter` uniform integer jitter to `base`, clamped to >= 0
/// (spec §5/§9). Each category's `Polling` state variant calls this from
/// its `State::countdown` impl.
pub fn jittered_countdown(base: u64, jitter: u64) -> u64 {
    use rand::Rng;
    let jitter = i64::try_from(jitter).unwrap_or(i64::MAX);
    let delta = rand::thread_rng().gen_range(-jitter..=jitter);
    (base as i64 + delta).max(0) as u64
}

fn default_max_groups_per_batch() -> usize {
    DEFAULT_MAX_GROUPS_PER_BATCH
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_max_retry_attempts() -> u32 {
    DEFAULT_MAX_RETRY_ATTEMPTS
}

/// Top-level configuration for the batch orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default = "CountdownConfig::memories_default")]
    pub memories: CountdownConfig,

    #[serde(default = "CountdownConfig::refinement_default")]
    pub refinement: CountdownConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            memories: CountdownConfig::memories_default(),
            refinement: CountdownConfig::refinement_default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Bounds shared across every category's `try_advance_state` loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_groups_per_batch")]
    pub max_groups_per_batch: usize,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_groups_per_batch: DEFAULT_MAX_GROUPS_PER_BATCH,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

/// Poll countdown base/jitter, shared shape for every category that polls
/// (spec §6/§9): `memories` defaults to base 60s, `refinement` to base 10s,
/// both ±10s jitter, clamped to ≥ 0. A category's `State::countdown_with`
/// reads this instead of a compile-time constant, so a YAML override of
/// `base_countdown_secs`/`jitter_secs` actually takes effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownConfig {
    pub base_countdown_secs: u64,
    pub jitter_secs: u64,
}

impl CountdownConfig {
    /// Applies this config's jitter to its base, per `jittered_countdown`.
    pub fn jittered(&self) -> u64 {
        jittered_countdown(self.base_countdown_secs, self.jitter_secs)
    }

    pub fn memories_default() -> Self {
        Self {
            base_countdown_secs: MEMORIES_POLL_BASE_SECS,
            jitter_secs: POLL_JITTER_SECS,
        }
    }

    pub fn refinement_default() -> Self {
        Self {
            base_countdown_secs: REFINEMENT_POLL_BASE_SECS,
            jitter_secs: POLL_JITTER_SECS,
        }
    }
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self::memories_default()
    }
}

/// Defaults for refinement discovery (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_date_proximity_days")]
    pub date_proximity_days: i64,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_max_candidates_per_seed")]
    pub max_candidates_per_seed: usize,
}

fn default_date_proximity_days() -> i64 {
    7
}

fn default_similarity_threshold() -> f32 {
    0.4
}

fn default_max_candidates_per_seed() -> usize {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            date_proximity_days: default_date_proximity_days(),
            similarity_threshold: default_similarity_threshold(),
            max_candidates_per_seed: default_max_candidates_per_seed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.batch.max_groups_per_batch, 50);
        assert_eq!(cfg.batch.max_poll_attempts, 500);
        assert_eq!(cfg.batch.max_retry_attempts, 100);
        assert_eq!(cfg.memories.base_countdown_secs, 60);
        assert_eq!(cfg.refinement.base_countdown_secs, 10);
        assert_eq!(cfg.discovery.date_proximity_days, 7);
        assert_eq!(cfg.discovery.similarity_threshold, 0.4);
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults() {
        let yaml = "batch:\n  max_groups_per_batch: 25\n";
        let cfg: CoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.batch.max_groups_per_batch, 25);
        assert_eq!(cfg.batch.max_poll_attempts, 500);
    }

    #[test]
    fn yaml_override_of_countdown_base_takes_effect() {
        let yaml = "memories:\n  base_countdown_secs: 5\n  jitter_secs: 0\n";
        let cfg: CoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.memories.base_countdown_secs, 5);
        assert_eq!(cfg.memories.jittered(), 5);
        assert_eq!(cfg.refinement.base_countdown_secs, 10);
    }
}
