//! Priority-ordered task queue.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use super::task::{TaskItem, TaskType};

/// A total-order key for `f64` priorities using IEEE-754 total order
/// (`total_cmp`), so priorities can live in a heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityKey(pub(crate) f64);

impl PriorityKey {
    /// The wrapped priority.
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Eq for PriorityKey {}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap entry: higher priority first, then lower sequence (older) first.
#[derive(Debug)]
struct Entry {
    priority: PriorityKey,
    sequence: Reverse<u64>,
    item: TaskItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-priority queue of [`TaskItem`]s with FIFO ordering among equals.
///
/// # Complexity
/// - `push`: O(log n)
/// - `pop`: O(log n)
/// - `peek`: O(1)
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Entry>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task; equal priorities pop in `sequence` order.
    pub fn push(&mut self, item: TaskItem) {
        self.heap.push(Entry {
            priority: PriorityKey(item.priority),
            sequence: Reverse(item.sequence),
            item,
        });
    }

    /// Removes and returns the highest-priority (oldest on ties) item.
    pub fn pop(&mut self) -> Option<TaskItem> {
        self.heap.pop().map(|e| e.item)
    }

    /// The task that would be popped next.
    pub fn peek(&self) -> Option<&TaskItem> {
        self.heap.peek().map(|e| &e.item)
    }

    /// Returns the number of queued tasks.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if no task is queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of pending items per task type.
    pub fn count_by_type(&self) -> HashMap<TaskType, usize> {
        let mut counts = HashMap::new();
        for entry in self.heap.iter() {
            *counts.entry(entry.item.task_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Drops every pending item, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}
