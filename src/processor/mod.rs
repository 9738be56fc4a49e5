//! Priority task queue and the time-boxed processor that drains it.
//!
//! Tasks are ranked at admission by `weight(type) × urgency × importance` and
//! dispatched highest first, FIFO among equal priorities, to the handler
//! registered for their type.

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod processor;
pub mod queue;
pub mod task;

pub use config::ProcessorConfig;
pub use error::{HandlerError, ProcessError};
pub use handler::{HandlerRegistry, TaskHandler};
pub use metrics::{ProcessedResult, ProcessorMetrics, QueueStatus};
pub use processor::TaskProcessor;
pub use queue::{PriorityKey, TaskQueue};
pub use task::{PriorityWeights, TaskItem, TaskType};
