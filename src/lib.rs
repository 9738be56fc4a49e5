//! adaptloop - adaptive policy and real-time task-processing core.
//!
//! A tabular Q-learning engine with bounded experience replay, a
//! priority-ordered task queue with a time-boxed processor, and a cycle
//! orchestrator that measures the system, picks corrective actions through
//! the learner, observes their effect and learns from it.
//!
//! Everything is single-threaded and tick-driven: the host (or the bundled
//! [`scheduler::Scheduler`]) calls [`processor::TaskProcessor::process`] and
//! [`orchestrator::Orchestrator::run_cycle`] on its own periods.

pub mod clock;
pub mod config;
pub mod learning;
pub mod orchestrator;
pub mod persistence;
pub mod processor;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use orchestrator::Orchestrator;
pub use scheduler::Scheduler;

/// Identifier type used for queued tasks.
pub type Id = String;

/// Generates a new unique identifier (UUID v4).
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
