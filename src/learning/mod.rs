//! Tabular reinforcement learning.
//!
//! A [`QLearner`] owns the [`PolicyStore`] (Q-table), the bounded
//! [`ExperienceBuffer`] used for replay, the epsilon-greedy
//! [`ActionSelector`], and the [`LearningParams`].

pub mod action;
pub mod buffer;
pub mod error;
pub mod learner;
pub mod params;
pub mod policy_store;
pub mod selector;
pub mod state;

pub use action::{actions, Action};
pub use buffer::{Experience, ExperienceBuffer};
pub use error::LearningError;
pub use learner::{LearnerCheckpoint, LearnerStats, QLearner, RewardTracking, REWARD_WINDOW};
pub use params::LearningParams;
pub use policy_store::{PolicyStore, PolicySummary};
pub use selector::ActionSelector;
pub use state::{State, StateKey};
