//! Epsilon-greedy action selection.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::action::Action;
use super::error::LearningError;
use super::policy_store::PolicyStore;
use super::state::{State, StateKey};

/// Epsilon-greedy policy over a [`PolicyStore`].
///
/// With probability ε a uniformly random action is explored; otherwise the
/// action with the highest Q-value is exploited. Ties go to the first
/// maximal action in caller-supplied order.
#[derive(Debug, Clone)]
pub struct ActionSelector {
    rng: StdRng,
}

impl ActionSelector {
    /// Creates a selector seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a selector with a reproducible random stream.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Picks an action for `state` from `available`.
    pub fn choose_action(
        &mut self,
        store: &PolicyStore,
        state: &State,
        available: &[Action],
        epsilon: f64,
    ) -> Result<Action, LearningError> {
        if available.is_empty() {
            return Err(LearningError::NoAvailableActions);
        }

        if epsilon > 0.0 && self.rng.gen::<f64>() < epsilon {
            // `available` is non-empty, so `choose` always yields.
            return Ok(available
                .choose(&mut self.rng)
                .unwrap_or(&available[0])
                .clone());
        }

        Ok(Self::best_action(store, &state.key(), available).clone())
    }

    /// Deterministic argmax over `available`; first maximum wins.
    ///
    /// `available` must be non-empty.
    pub fn best_action<'a>(store: &PolicyStore, key: &StateKey, available: &'a [Action]) -> &'a Action {
        let mut best = &available[0];
        let mut best_value = store.get_by_key(key, best);
        for action in &available[1..] {
            let value = store.get_by_key(key, action);
            // Strict comparison keeps the earliest action on ties.
            if value > best_value {
                best = action;
                best_value = value;
            }
        }
        best
    }

    /// Mutable access to the random stream, shared with batch sampling.
    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for ActionSelector {
    fn default() -> Self {
        Self::new()
    }
}
