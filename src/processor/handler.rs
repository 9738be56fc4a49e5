//! Typed handler registry.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use super::error::{HandlerError, ProcessError};
use super::task::{TaskItem, TaskType};

/// Processes one dequeued task.
///
/// Implemented for any `FnMut(&TaskItem) -> Result<Value, HandlerError>`, so
/// closures can be registered directly.
pub trait TaskHandler: Send {
    fn handle(&mut self, task: &TaskItem) -> Result<Value, HandlerError>;
}

impl<F> TaskHandler for F
where
    F: FnMut(&TaskItem) -> Result<Value, HandlerError> + Send,
{
    fn handle(&mut self, task: &TaskItem) -> Result<Value, HandlerError> {
        self(task)
    }
}

/// Map of task type to its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Box<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `task_type`, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register<H>(&mut self, task_type: TaskType, handler: H) -> Result<bool, ProcessError>
    where
        H: TaskHandler + 'static,
    {
        if task_type.as_str().trim().is_empty() {
            return Err(ProcessError::InvalidTaskType(task_type.to_string()));
        }
        Ok(self
            .handlers
            .insert(task_type, Box::new(handler))
            .is_some())
    }

    /// Closure-friendly [`HandlerRegistry::register`]; the signature pins the
    /// closure's argument and return types.
    pub fn register_fn<F>(&mut self, task_type: TaskType, handler: F) -> Result<bool, ProcessError>
    where
        F: FnMut(&TaskItem) -> Result<Value, HandlerError> + Send + 'static,
    {
        self.register(task_type, handler)
    }

    /// Removes the handler for `task_type`, returning whether one existed.
    pub fn unregister(&mut self, task_type: &TaskType) -> bool {
        self.handlers.remove(task_type).is_some()
    }

    /// Whether `task_type` has a handler.
    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Dispatches `task` to its handler.
    ///
    /// A panicking handler is reported as [`ProcessError::HandlerFailed`].
    pub fn dispatch(&mut self, task: &TaskItem) -> Result<Value, ProcessError> {
        let handler = self
            .handlers
            .get_mut(&task.task_type)
            .ok_or_else(|| ProcessError::UnknownHandlerType(task.task_type.to_string()))?;
        panic::catch_unwind(AssertUnwindSafe(|| handler.handle(task)))
            .unwrap_or_else(|payload| {
                Err(HandlerError::new(format!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                )))
            })
            .map_err(|source| ProcessError::HandlerFailed {
                task_type: task.task_type.to_string(),
                task_id: task.id.clone(),
                source,
            })
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered types, sorted for stable output.
    pub fn types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn task(t: &str) -> TaskItem {
        TaskItem {
            id: "id-1".into(),
            task_type: t.into(),
            payload: json!({"n": 2}),
            enqueued_at: Utc::now(),
            priority: 1.0,
            sequence: 0,
        }
    }

    #[test]
    fn dispatches_to_registered_closure() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("double".into(), |t| {
                Ok(json!(t.payload["n"].as_i64().unwrap_or(0) * 2))
            })
            .unwrap();
        assert_eq!(registry.dispatch(&task("double")).unwrap(), json!(4));
    }

    #[test]
    fn panicking_handler_becomes_failure() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("boom".into(), |t| panic!("bad payload {}", t.id))
            .unwrap();
        let err = registry.dispatch(&task("boom")).unwrap_err();
        match err {
            ProcessError::HandlerFailed { task_type, source, .. } => {
                assert_eq!(task_type, "boom");
                assert!(source.message.starts_with("handler panicked: bad payload"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_reported() {
        let mut registry = HandlerRegistry::new();
        let err = registry.dispatch(&task("nope")).unwrap_err();
        assert!(matches!(err, ProcessError::UnknownHandlerType(t) if t == "nope"));
    }

    #[test]
    fn re_registration_overwrites() {
        let mut registry = HandlerRegistry::new();
        let first = registry.register_fn("t".into(), |_| Ok(json!(1))).unwrap();
        let second = registry.register_fn("t".into(), |_| Ok(json!(2))).unwrap();
        assert!(!first);
        assert!(second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch(&task("t")).unwrap(), json!(2));
    }

    #[test]
    fn blank_type_rejected_at_registration() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register_fn("  ".into(), |_| Ok(Value::Null))
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidTaskType(_)));
        assert!(registry.is_empty());
    }

    struct Counter(u32);

    impl TaskHandler for Counter {
        fn handle(&mut self, _task: &TaskItem) -> Result<Value, HandlerError> {
            self.0 += 1;
            Ok(json!(self.0))
        }
    }

    #[test]
    fn stateful_handler_struct() {
        let mut registry = HandlerRegistry::new();
        registry.register("count".into(), Counter(0)).unwrap();
        registry.dispatch(&task("count")).unwrap();
        assert_eq!(registry.dispatch(&task("count")).unwrap(), json!(2));
    }

    #[test]
    fn handler_failure_is_wrapped() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("boom".into(), |_| Err(HandlerError::new("exploded")))
            .unwrap();
        let err = registry.dispatch(&task("boom")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Handler for task type boom failed on task id-1: exploded"
        );
    }
}
