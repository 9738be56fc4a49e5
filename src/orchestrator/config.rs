use serde::{Deserialize, Serialize};

use super::evaluate::Thresholds;

/// Tuning of the cycle orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub thresholds: Thresholds,
    /// Experiences replayed after the per-flag updates; 0 disables replay.
    pub replay_batch_size: usize,
    /// Capacity of the cycle history ring.
    pub history_capacity: usize,
    /// Subtracted from the reward when an action failed to execute.
    pub failure_penalty: f64,
    /// `(min, max)` for learning-rate adjustments.
    pub learning_rate_bounds: (f64, f64),
    /// Seed for action selection; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            replay_batch_size: 32,
            history_capacity: 1000,
            failure_penalty: 1.0,
            learning_rate_bounds: (0.001, 0.5),
            seed: None,
        }
    }
}
