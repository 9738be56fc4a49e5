//! Q-learning hyperparameters.

use serde::{Deserialize, Serialize};

use super::error::LearningError;

/// Hyperparameters of the tabular Q-learner.
///
/// Mutated only by [`LearningParams::decay_epsilon`] and by explicit
/// configuration; persisted next to the policy store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningParams {
    /// Step size α.
    pub learning_rate: f64,
    /// Discount factor γ.
    pub discount_factor: f64,
    /// Current exploration rate ε.
    pub epsilon: f64,
    /// Multiplicative decay applied to ε after each update.
    pub epsilon_decay: f64,
    /// Floor for ε.
    pub epsilon_min: f64,
}

impl LearningParams {
    /// Checks every parameter against its legal range.
    ///
    /// - `learning_rate ∈ (0, 1]`
    /// - `discount_factor ∈ [0, 1]`
    /// - `epsilon_decay ∈ (0, 1]`
    /// - `0 ≤ epsilon_min ≤ epsilon ≤ 1`
    pub fn validate(&self) -> Result<(), LearningError> {
        let checks: [(&'static str, f64, bool); 5] = [
            (
                "learning_rate",
                self.learning_rate,
                self.learning_rate > 0.0 && self.learning_rate <= 1.0,
            ),
            (
                "discount_factor",
                self.discount_factor,
                (0.0..=1.0).contains(&self.discount_factor),
            ),
            (
                "epsilon_decay",
                self.epsilon_decay,
                self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0,
            ),
            (
                "epsilon_min",
                self.epsilon_min,
                (0.0..=1.0).contains(&self.epsilon_min),
            ),
            (
                "epsilon",
                self.epsilon,
                self.epsilon >= self.epsilon_min && self.epsilon <= 1.0,
            ),
        ];
        for (name, value, ok) in checks {
            // NaN fails every range check above.
            if !ok {
                return Err(LearningError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }

    /// Applies one decay step: `ε ← max(ε_min, ε · ε_decay)`.
    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
    }

    /// Sets the learning rate, clamped into `[lo, hi]` and `(0, 1]`.
    pub fn set_learning_rate_clamped(&mut self, rate: f64, lo: f64, hi: f64) {
        let clamped = rate.max(lo).min(hi).max(f64::MIN_POSITIVE).min(1.0);
        if clamped.is_finite() {
            self.learning_rate = clamped;
        }
    }
}

impl Default for LearningParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            discount_factor: 0.95,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
        }
    }
}
