//! State snapshots and their digest keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An observed snapshot: a mapping of named values.
///
/// Backed by a `BTreeMap` so serialization is canonical (keys always in
/// sorted order), which makes [`State::key`] independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    fields: BTreeMap<String, Value>,
}

impl State {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a numeric field, if present and numeric.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    /// Returns the number of features.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the state has no features.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reduces the state to its lookup key.
    ///
    /// The key is the BLAKE3 digest of the canonical JSON encoding. Equal
    /// states always yield equal keys.
    pub fn key(&self) -> StateKey {
        // A map of `Value`s always serializes; the empty fallback is unreachable.
        let bytes = serde_json::to_vec(&self.fields).unwrap_or_default();
        StateKey(blake3::hash(&bytes).to_hex().to_string())
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Hex-encoded 256-bit digest identifying a [`State`] in the policy store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this looks like a digest produced by [`State::key`].
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
