//! Task items and priority computation.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Id;

/// Name of a task type; handlers are registered per type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    /// Reward-driven policy updates; highest default weight.
    pub const REINFORCEMENT_UPDATE: &'static str = "reinforcement_update";
    /// Learning-state maintenance.
    pub const LEARNING_UPDATE: &'static str = "learning_update";
    /// Tuning work.
    pub const OPTIMIZATION_UPDATE: &'static str = "optimization_update";
    /// Pattern mining.
    pub const PATTERN_RECOGNITION: &'static str = "pattern_recognition";
    /// Bulk data work; falls back to the default weight.
    pub const DATA_PROCESSING: &'static str = "data_processing";

    /// Creates a task type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TaskType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: Id,
    pub task_type: TaskType,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub priority: f64,
    /// Admission order, used to break priority ties FIFO.
    pub sequence: u64,
}

/// Per-type base weights used to rank tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub weights: HashMap<String, f64>,
    /// Weight for any type absent from `weights`.
    pub default_weight: f64,
}

impl PriorityWeights {
    /// Weight of `task_type`, or the default weight when unset.
    pub fn weight(&self, task_type: &TaskType) -> f64 {
        self.weights
            .get(task_type.as_str())
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Sets the weight of `task_type`.
    pub fn set_weight(&mut self, task_type: &TaskType, weight: f64) {
        self.weights.insert(task_type.as_str().to_owned(), weight);
    }

    /// `weight(type) × urgency × importance`.
    ///
    /// Multipliers come from numeric payload fields `urgency` and
    /// `importance`. Missing, non-numeric, non-finite or non-positive values
    /// count as `1.0`.
    pub fn priority(&self, task_type: &TaskType, payload: &Value) -> f64 {
        self.weight(task_type) * multiplier(payload, "urgency") * multiplier(payload, "importance")
    }
}

fn multiplier(payload: &Value, field: &str) -> f64 {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(1.0)
}

impl Default for PriorityWeights {
    fn default() -> Self {
        let weights = [
            (TaskType::REINFORCEMENT_UPDATE, 10.0),
            (TaskType::LEARNING_UPDATE, 8.0),
            (TaskType::OPTIMIZATION_UPDATE, 6.0),
            (TaskType::PATTERN_RECOGNITION, 4.0),
        ]
        .into_iter()
        .map(|(name, w)| (name.to_owned(), w))
        .collect();
        Self {
            weights,
            default_weight: 1.0,
        }
    }
}
