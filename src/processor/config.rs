//! Processor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::PriorityWeights;

/// Configuration of the [`super::TaskProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Item cap for a scheduled tick.
    pub max_items_per_tick: usize,
    /// Wall-time budget for a scheduled tick, in milliseconds.
    pub time_budget_ms: u64,
    /// Capacity of the results buffer.
    pub result_capacity: usize,
    /// Per-type priority weights.
    pub weights: PriorityWeights,
}

impl ProcessorConfig {
    /// `time_budget_ms` as a [`Duration`].
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_items_per_tick: 1000,
            time_budget_ms: 5_000,
            result_capacity: 1000,
            weights: PriorityWeights::default(),
        }
    }
}
