//! Time-boxed dequeue/dispatch loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::config::ProcessorConfig;
use super::error::{HandlerError, ProcessError};
use super::handler::{HandlerRegistry, TaskHandler};
use super::metrics::{ProcessedResult, ProcessorMetrics, QueueStatus};
use super::queue::TaskQueue;
use super::task::{PriorityWeights, TaskItem, TaskType};
use crate::clock::{Clock, SystemClock};
use crate::{generate_id, Id};

/// Priority task queue plus the handlers that drain it.
///
/// # Lifecycle
///
/// 1. Register a handler per task type with [`TaskProcessor::register_handler`].
/// 2. Submit work with [`TaskProcessor::enqueue`].
/// 3. Call [`TaskProcessor::process`] (or [`TaskProcessor::tick`]) from the
///    host's periodic trigger.
///
/// Handler failures, handler panics and missing handlers never abort a
/// batch: the item is dropped, the `errors` counter incremented, and the loop
/// continues.
pub struct TaskProcessor {
    queue: TaskQueue,
    handlers: HandlerRegistry,
    weights: PriorityWeights,
    results: VecDeque<ProcessedResult>,
    result_capacity: usize,
    max_items_per_tick: usize,
    time_budget: Duration,
    metrics: ProcessorMetrics,
    next_sequence: u64,
    clock: Arc<dyn Clock>,
}

impl TaskProcessor {
    /// Creates a processor on the system clock.
    pub fn new(config: ProcessorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a processor reading time from `clock`.
    pub fn with_clock(config: ProcessorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: TaskQueue::new(),
            handlers: HandlerRegistry::new(),
            weights: config.weights.clone(),
            results: VecDeque::new(),
            result_capacity: config.result_capacity.max(1),
            max_items_per_tick: config.max_items_per_tick,
            time_budget: config.time_budget(),
            metrics: ProcessorMetrics::default(),
            next_sequence: 0,
            clock,
        }
    }

    /// Queues a task and returns its id.
    ///
    /// Priority is fixed at admission from the type weight and the payload's
    /// `urgency` / `importance` multipliers.
    pub fn enqueue(&mut self, task_type: impl Into<TaskType>, payload: Value) -> Id {
        let task_type = task_type.into();
        let priority = self.weights.priority(&task_type, &payload);
        let id = generate_id();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        debug!(task_id = %id, %task_type, priority, "Task enqueued");
        self.queue.push(TaskItem {
            id: id.clone(),
            task_type,
            payload,
            enqueued_at: self.clock.now(),
            priority,
            sequence,
        });
        self.metrics.queue_size = self.queue.len();
        id
    }

    /// Registers a closure handler for `task_type`; re-registration overwrites.
    pub fn register_handler<F>(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut(&TaskItem) -> Result<Value, HandlerError> + Send + 'static,
    {
        self.register_task_handler(task_type, handler)
    }

    /// Registers any [`TaskHandler`] implementation for `task_type`.
    pub fn register_task_handler<H>(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: H,
    ) -> Result<(), ProcessError>
    where
        H: TaskHandler + 'static,
    {
        let task_type = task_type.into();
        if self.handlers.register(task_type.clone(), handler)? {
            debug!(%task_type, "Handler replaced");
        }
        Ok(())
    }

    /// Changes the base weight of a task type for future enqueues.
    pub fn set_type_weight(
        &mut self,
        task_type: impl Into<TaskType>,
        weight: f64,
    ) -> Result<(), ProcessError> {
        let task_type = task_type.into();
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ProcessError::InvalidWeight {
                task_type: task_type.to_string(),
                weight,
            });
        }
        self.weights.set_weight(&task_type, weight);
        Ok(())
    }

    /// Effective priority weight of `task_type`.
    pub fn type_weight(&self, task_type: &TaskType) -> f64 {
        self.weights.weight(task_type)
    }

    /// Drains the queue in priority order.
    ///
    /// Stops when `max_items` items have been dispatched, when the elapsed
    /// time reaches `time_budget` (checked between items), or when the queue
    /// is empty, checked in that order. A slow handler is not preempted.
    ///
    /// Returns the number of items handled successfully in this batch.
    #[instrument(skip(self), fields(queued = self.queue.len()))]
    pub fn process(&mut self, max_items: usize, time_budget: Duration) -> usize {
        let start = self.clock.now();
        let mut attempted = 0usize;
        let mut processed = 0usize;

        loop {
            if attempted >= max_items {
                break;
            }
            if self.clock.elapsed_since(start) >= time_budget {
                debug!(attempted, "Time budget exhausted");
                break;
            }
            let Some(item) = self.queue.pop() else {
                break;
            };
            attempted += 1;

            match self.handlers.dispatch(&item) {
                Ok(result) => {
                    let completed_at = self.clock.now();
                    let latency = (completed_at - item.enqueued_at)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    self.push_result(ProcessedResult {
                        task_id: item.id,
                        task_type: item.task_type.to_string(),
                        result,
                        latency,
                        completed_at,
                    });
                    processed += 1;
                }
                Err(err) => {
                    warn!(task_id = %item.id, task_type = %item.task_type, error = %err, "Task dropped");
                    self.metrics.errors += 1;
                }
            }
        }

        let finished = self.clock.now();
        self.metrics.processed_items += processed as u64;
        self.metrics.queue_size = self.queue.len();
        self.metrics.buffer_size = self.results.len();
        self.metrics.last_processed = Some(finished);
        self.metrics.last_batch_duration = (finished - start).to_std().unwrap_or(Duration::ZERO);

        debug!(attempted, processed, remaining = self.queue.len(), "Batch finished");
        processed
    }

    /// Runs one batch with the configured item cap and time budget.
    pub fn tick(&mut self) -> usize {
        self.process(self.max_items_per_tick, self.time_budget)
    }

    fn push_result(&mut self, result: ProcessedResult) {
        self.results.push_back(result);
        while self.results.len() > self.result_capacity {
            self.results.pop_front();
        }
    }

    /// Counters accumulated since construction.
    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    /// Returns the number of queued tasks.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue depth by type plus current counters.
    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            queue_size: self.queue.len(),
            buffer_size: self.results.len(),
            by_type: self
                .queue
                .count_by_type()
                .into_iter()
                .map(|(t, n)| (t.to_string(), n))
                .collect(),
            metrics: self.metrics.clone(),
        }
    }

    /// The task type with the most pending items, if any.
    pub fn most_backlogged_type(&self) -> Option<TaskType> {
        self.queue
            .count_by_type()
            .into_iter()
            .max_by(|(ta, na), (tb, nb)| na.cmp(nb).then_with(|| tb.cmp(ta)))
            .map(|(t, _)| t)
    }

    /// Completed results, oldest first.
    pub fn results(&self) -> impl Iterator<Item = &ProcessedResult> {
        self.results.iter()
    }

    /// Drops every stored result, returning how many there were.
    pub fn clear_results(&mut self) -> usize {
        let n = self.results.len();
        self.results.clear();
        self.metrics.buffer_size = 0;
        n
    }

    /// Maximum number of results kept.
    pub fn result_capacity(&self) -> usize {
        self.result_capacity
    }

    /// Resizes the results buffer; shrinking evicts the oldest results.
    pub fn set_result_capacity(&mut self, capacity: usize) {
        self.result_capacity = capacity.max(1);
        while self.results.len() > self.result_capacity {
            self.results.pop_front();
        }
        self.metrics.buffer_size = self.results.len();
    }

    /// Item cap used by [`TaskProcessor::tick`].
    pub fn max_items_per_tick(&self) -> usize {
        self.max_items_per_tick
    }

    /// Sets the item cap used by [`TaskProcessor::tick`] (minimum 1).
    pub fn set_max_items_per_tick(&mut self, max_items: usize) {
        self.max_items_per_tick = max_items.max(1);
    }

    /// Time budget used by [`TaskProcessor::tick`].
    pub fn time_budget(&self) -> Duration {
        self.time_budget
    }

    /// Sets the time budget used by [`TaskProcessor::tick`].
    pub fn set_time_budget(&mut self, budget: Duration) {
        self.time_budget = budget;
    }

    /// Task types that have a handler, sorted.
    pub fn handler_types(&self) -> Vec<TaskType> {
        self.handlers.types()
    }
}

impl std::fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("queue_len", &self.queue.len())
            .field("handlers", &self.handlers)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
