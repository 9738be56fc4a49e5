//! Q-learning update engine.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::action::Action;
use super::buffer::{Experience, ExperienceBuffer};
use super::error::LearningError;
use super::params::LearningParams;
use super::policy_store::{PolicyStore, PolicySummary};
use super::selector::ActionSelector;
use super::state::State;

/// Rewards averaged by [`RewardTracking::average_reward`].
pub const REWARD_WINDOW: usize = 100;

/// Running reward statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardTracking {
    /// Experiences recorded.
    pub episodes: u64,
    pub total_reward: f64,
    /// Largest single reward seen; `None` until the first experience.
    pub best_reward: Option<f64>,
    /// The last [`REWARD_WINDOW`] rewards, oldest first.
    #[serde(default)]
    recent: VecDeque<f64>,
}

impl RewardTracking {
    /// Mean of the last [`REWARD_WINDOW`] rewards, or `0.0` before any.
    pub fn average_reward(&self) -> f64 {
        if self.recent.is_empty() {
            0.0
        } else {
            self.recent.iter().sum::<f64>() / self.recent.len() as f64
        }
    }

    fn observe(&mut self, reward: f64) {
        self.episodes += 1;
        self.total_reward += reward;
        self.best_reward = Some(self.best_reward.map_or(reward, |b| b.max(reward)));
        if self.recent.len() == REWARD_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(reward);
    }
}

/// Snapshot of the learner's hyperparameters and progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnerStats {
    pub epsilon: f64,
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub total_experiences: usize,
    pub total_updates: u64,
    pub total_reward: f64,
    pub best_reward: Option<f64>,
    pub average_reward: f64,
}

/// Learning state captured by [`QLearner::checkpoint`].
///
/// The selector's random stream is not part of it.
#[derive(Debug, Clone)]
pub struct LearnerCheckpoint {
    store: PolicyStore,
    buffer: ExperienceBuffer,
    params: LearningParams,
    tracking: RewardTracking,
    total_updates: u64,
}

/// Tabular Q-learner: policy store, replay buffer, selector and parameters.
///
/// # Update rule
///
/// ```text
/// target = r                              if done
///        = r + γ · max_{a'} Q(s', a')     otherwise
/// Q(s, a) ← Q(s, a) + α · (target − Q(s, a))
/// ```
///
/// ε decays after every update.
#[derive(Debug, Clone)]
pub struct QLearner {
    store: PolicyStore,
    buffer: ExperienceBuffer,
    params: LearningParams,
    initial_epsilon: f64,
    selector: ActionSelector,
    tracking: RewardTracking,
    total_updates: u64,
}

impl QLearner {
    /// Creates a learner after validating `params`.
    pub fn new(params: LearningParams, buffer_capacity: usize) -> Result<Self, LearningError> {
        Self::with_selector(params, buffer_capacity, ActionSelector::new())
    }

    /// Creates a learner whose exploration and replay sampling are reproducible.
    pub fn seeded(
        params: LearningParams,
        buffer_capacity: usize,
        seed: u64,
    ) -> Result<Self, LearningError> {
        Self::with_selector(params, buffer_capacity, ActionSelector::seeded(seed))
    }

    fn with_selector(
        params: LearningParams,
        buffer_capacity: usize,
        selector: ActionSelector,
    ) -> Result<Self, LearningError> {
        params.validate()?;
        Ok(Self {
            store: PolicyStore::new(),
            buffer: ExperienceBuffer::new(buffer_capacity)?,
            params,
            initial_epsilon: params.epsilon,
            selector,
            tracking: RewardTracking::default(),
            total_updates: 0,
        })
    }

    /// Q-value of `(state, action)`, `0.0` when unset.
    pub fn get_value(&self, state: &State, action: &Action) -> f64 {
        self.store.get_value(state, action)
    }

    /// Overwrites the Q-value of `(state, action)`.
    pub fn set_value(&mut self, state: &State, action: &Action, value: f64) {
        self.store.set_value(state, action, value);
    }

    /// Epsilon-greedy choice among `available`.
    pub fn choose_action(
        &mut self,
        state: &State,
        available: &[Action],
    ) -> Result<Action, LearningError> {
        self.selector
            .choose_action(&self.store, state, available, self.params.epsilon)
    }

    /// Applies one Q-learning update and decays ε.
    ///
    /// `next_actions` is the action set valid in `next_state`; when empty the
    /// future term is zero.
    pub fn update(
        &mut self,
        state: &State,
        action: &Action,
        reward: f64,
        next_state: &State,
        next_actions: &[Action],
        done: bool,
    ) {
        let key = state.key();
        let current = self.store.get_by_key(&key, action);
        let target = if done {
            reward
        } else {
            let max_future = self.store.max_over(&next_state.key(), next_actions);
            reward + self.params.discount_factor * max_future
        };
        let new_q = current + self.params.learning_rate * (target - current);

        if new_q.is_finite() {
            self.store.set_by_key(key, action.clone(), new_q);
        } else {
            debug!(%action, reward, "Skipping non-finite Q-value update");
        }
        trace!(%action, current, target, new_q, "Q-value updated");

        self.total_updates += 1;
        self.params.decay_epsilon();
    }

    /// Applies [`QLearner::update`] to a stored experience.
    pub fn update_from(&mut self, experience: &Experience) {
        self.update(
            &experience.state,
            &experience.action,
            experience.reward,
            &experience.next_state,
            &experience.next_actions,
            experience.done,
        );
    }

    /// Stores an experience for replay and folds its reward into tracking.
    pub fn record(&mut self, experience: Experience) {
        self.tracking.observe(experience.reward);
        self.buffer.add(experience);
    }

    /// Replays `min(batch_size, |buffer|)` randomly sampled experiences.
    ///
    /// Returns how many experiences were replayed.
    pub fn train_on_batch(&mut self, batch_size: usize) -> usize {
        let batch = self.buffer.sample_batch(batch_size, self.selector.rng_mut());
        for experience in &batch {
            self.update_from(experience);
        }
        if !batch.is_empty() {
            debug!(replayed = batch.len(), epsilon = self.params.epsilon, "Replayed experience batch");
        }
        batch.len()
    }

    /// Q-values of `state` for every action in `actions`, in order.
    pub fn action_values(&self, state: &State, actions: &[Action]) -> Vec<(Action, f64)> {
        let key = state.key();
        actions
            .iter()
            .map(|a| (a.clone(), self.store.get_by_key(&key, a)))
            .collect()
    }

    /// `max_a Q(state, a)` over `actions`, or `0.0` when empty.
    pub fn state_value(&self, state: &State, actions: &[Action]) -> f64 {
        self.store.max_over(&state.key(), actions)
    }

    /// Captures the Q-table, buffer, parameters and counters.
    pub fn checkpoint(&self) -> LearnerCheckpoint {
        LearnerCheckpoint {
            store: self.store.clone(),
            buffer: self.buffer.clone(),
            params: self.params,
            tracking: self.tracking.clone(),
            total_updates: self.total_updates,
        }
    }

    /// Returns to the state captured by `checkpoint`.
    pub fn rollback(&mut self, checkpoint: LearnerCheckpoint) {
        self.store = checkpoint.store;
        self.buffer = checkpoint.buffer;
        self.params = checkpoint.params;
        self.tracking = checkpoint.tracking;
        self.total_updates = checkpoint.total_updates;
    }

    /// Forgets everything learned and restores the initial ε.
    pub fn reset(&mut self) {
        self.store.clear();
        self.buffer.clear();
        self.tracking = RewardTracking::default();
        self.total_updates = 0;
        self.params.epsilon = self.initial_epsilon;
    }

    /// Current hyperparameters.
    pub fn params(&self) -> &LearningParams {
        &self.params
    }

    /// Replaces the parameters after validation.
    pub fn set_params(&mut self, params: LearningParams) -> Result<(), LearningError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub(crate) fn params_mut(&mut self) -> &mut LearningParams {
        &mut self.params
    }

    /// The Q-table.
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// The replay buffer.
    pub fn buffer(&self) -> &ExperienceBuffer {
        &self.buffer
    }

    /// Mutable access to the replay buffer.
    pub fn buffer_mut(&mut self) -> &mut ExperienceBuffer {
        &mut self.buffer
    }

    /// Reward statistics.
    pub fn tracking(&self) -> &RewardTracking {
        &self.tracking
    }

    pub(crate) fn replace_store(&mut self, store: PolicyStore) {
        self.store = store;
    }

    pub(crate) fn replace_buffer(&mut self, buffer: ExperienceBuffer) {
        self.buffer = buffer;
    }

    /// Q-table statistics.
    pub fn summary(&self) -> PolicySummary {
        self.store.summary()
    }

    /// Hyperparameters and progress counters.
    pub fn stats(&self) -> LearnerStats {
        LearnerStats {
            epsilon: self.params.epsilon,
            learning_rate: self.params.learning_rate,
            discount_factor: self.params.discount_factor,
            total_experiences: self.buffer.len(),
            total_updates: self.total_updates,
            total_reward: self.tracking.total_reward,
            best_reward: self.tracking.best_reward,
            average_reward: self.tracking.average_reward(),
        }
    }
}
