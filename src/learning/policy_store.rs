//! Tabular state-action value storage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::state::{State, StateKey};

/// Map of `(state-key, action) → Q-value`.
///
/// Entries are created lazily; an absent entry reads as `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyStore {
    table: HashMap<StateKey, HashMap<Action, f64>>,
}

/// Aggregate statistics over every stored Q-value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    /// Number of distinct state keys.
    pub states: usize,
    /// Number of `(state, action)` entries.
    pub entries: usize,
    pub mean_value: f64,
    /// Population variance of all Q-values.
    pub value_variance: f64,
    pub min_value: f64,
    pub max_value: f64,
}

impl PolicyStore {
    /// Creates an empty Q-table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Q(state, action)`, or `0.0` if never set.
    pub fn get_value(&self, state: &State, action: &Action) -> f64 {
        self.get_by_key(&state.key(), action)
    }

    /// Upserts `Q(state, action)`.
    pub fn set_value(&mut self, state: &State, action: &Action, value: f64) {
        self.set_by_key(state.key(), action.clone(), value);
    }

    /// Q-value for an already-hashed state, `0.0` when unset.
    pub fn get_by_key(&self, key: &StateKey, action: &Action) -> f64 {
        self.table
            .get(key)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Stores a Q-value for an already-hashed state.
    pub fn set_by_key(&mut self, key: StateKey, action: Action, value: f64) {
        self.table.entry(key).or_default().insert(action, value);
    }

    /// Maximum of `Q(key, a)` over `actions`, or `0.0` when `actions` is empty.
    pub fn max_over(&self, key: &StateKey, actions: &[Action]) -> f64 {
        actions
            .iter()
            .map(|a| self.get_by_key(key, a))
            .fold(None, |best: Option<f64>, v| {
                Some(best.map_or(v, |b| b.max(v)))
            })
            .unwrap_or(0.0)
    }

    /// Number of distinct states with at least one entry.
    pub fn state_count(&self) -> usize {
        self.table.len()
    }

    /// Total number of `(state, action)` entries.
    pub fn len(&self) -> usize {
        self.table.values().map(HashMap::len).sum()
    }

    /// Returns `true` if no Q-value is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every Q-value.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Iterates over every `(key, action, value)` triple.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Action, f64)> {
        self.table
            .iter()
            .flat_map(|(k, row)| row.iter().map(move |(a, v)| (k, a, *v)))
    }

    /// Entry count, state count and value statistics.
    pub fn summary(&self) -> PolicySummary {
        let entries = self.len();
        if entries == 0 {
            return PolicySummary {
                states: self.state_count(),
                ..PolicySummary::default()
            };
        }

        let n = entries as f64;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for (_, _, v) in self.iter() {
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        let mean = sum / n;
        let variance = self.iter().map(|(_, _, v)| (v - mean).powi(2)).sum::<f64>() / n;

        PolicySummary {
            states: self.state_count(),
            entries,
            mean_value: mean,
            value_variance: variance,
            min_value: min,
            max_value: max,
        }
    }
}

impl FromIterator<(StateKey, Action, f64)> for PolicyStore {
    fn from_iter<I: IntoIterator<Item = (StateKey, Action, f64)>>(iter: I) -> Self {
        let mut store = PolicyStore::new();
        for (key, action, value) in iter {
            store.set_by_key(key, action, value);
        }
        store
    }
}
