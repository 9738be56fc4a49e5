//! Action identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An action identifier.
///
/// Actions are not globally enumerable: each decision context supplies its
/// own legal set when asking the selector for a choice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// Creates an action from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The action name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds an owned action list from string literals.
pub fn actions(names: &[&str]) -> Vec<Action> {
    names.iter().map(|n| Action::from(*n)).collect()
}
