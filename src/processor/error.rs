use thiserror::Error;

/// Failure reported by a task handler.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcessError {
    #[error("No handler registered for task type: {0}")]
    UnknownHandlerType(String),

    #[error("Handler for task type {task_type} failed on task {task_id}: {source}")]
    HandlerFailed {
        task_type: String,
        task_id: String,
        #[source]
        source: HandlerError,
    },

    #[error("Invalid task type name: {0:?}")]
    InvalidTaskType(String),

    #[error("Invalid priority weight for task type {task_type}: {weight}")]
    InvalidWeight { task_type: String, weight: f64 },
}
