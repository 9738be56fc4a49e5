//! Records produced by each cycle.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluate::{Evaluation, Flag};
use crate::learning::Action;

/// Result of executing one corrective action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failure(String),
}

impl ActionOutcome {
    /// Failed outcome carrying `reason`.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    /// Whether the action took effect.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// An action chosen in the Act phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakenAction {
    pub flag: Flag,
    pub action: Action,
    pub outcome: ActionOutcome,
}

/// Before/after measurement of one acted-upon flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub flag: Flag,
    pub before: f64,
    pub after: f64,
    /// `before - after`; positive means the metric improved.
    pub delta: f64,
    /// Reward fed to the learner.
    pub reward: f64,
}

/// One completed iteration of the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    pub evaluation: Evaluation,
    pub actions_taken: Vec<TakenAction>,
    pub observations: Vec<Observation>,
    pub duration: Duration,
}

/// Bounded ring of [`CycleRecord`]s, oldest evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleHistory {
    records: VecDeque<CycleRecord>,
    capacity: usize,
}

impl CycleHistory {
    /// Creates an empty history keeping at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn push(&mut self, record: CycleRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<&CycleRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).collect()
    }

    /// The most recent record.
    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no cycle has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn replace(&mut self, records: Vec<CycleRecord>) {
        self.records.clear();
        for record in records {
            self.push(record);
        }
    }
}
