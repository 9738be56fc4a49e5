//! Bounded experience replay memory.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::action::Action;
use super::error::LearningError;
use super::state::State;

/// Default replay capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A single observed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub state: State,
    pub action: Action,
    pub reward: f64,
    pub next_state: State,
    /// Actions legal in `next_state`, used for the bootstrapped target.
    #[serde(default)]
    pub next_actions: Vec<Action>,
    /// Terminal transition: no bootstrapping from `next_state`.
    pub done: bool,
    pub timestamp: DateTime<Utc>,
}

impl Experience {
    /// Creates an experience stamped with the current time.
    pub fn new(
        state: State,
        action: Action,
        reward: f64,
        next_state: State,
        next_actions: Vec<Action>,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            next_actions,
            done,
            timestamp: Utc::now(),
        }
    }

    /// Overrides the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Fixed-capacity FIFO ring of [`Experience`]s.
///
/// When full, adding evicts the oldest entry; the relative order of the
/// remaining entries is preserved.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    entries: VecDeque<Experience>,
    capacity: usize,
}

impl ExperienceBuffer {
    /// Creates an empty buffer. `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Result<Self, LearningError> {
        if capacity == 0 {
            return Err(LearningError::ZeroCapacity);
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        })
    }

    /// Appends an experience, evicting the oldest one if over capacity.
    pub fn add(&mut self, experience: Experience) {
        self.entries.push_back(experience);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Returns `min(n, len)` distinct entries chosen uniformly at random.
    ///
    /// Never mutates the buffer; an empty buffer yields an empty batch.
    pub fn sample_batch<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Experience> {
        let amount = n.min(self.entries.len());
        if amount == 0 {
            return Vec::new();
        }
        index::sample(rng, self.entries.len(), amount)
            .into_iter()
            .map(|i| self.entries[i].clone())
            .collect()
    }

    /// Changes the capacity; shrinking evicts the oldest entries first.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), LearningError> {
        if capacity == 0 {
            return Err(LearningError::ZeroCapacity);
        }
        self.capacity = capacity;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        Ok(())
    }

    /// Maximum number of stored experiences.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of stored experiences.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no experience is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every experience.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }
}

impl Default for ExperienceBuffer {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn exp(tag: i64) -> Experience {
        Experience::new(
            State::new().with("tag", tag),
            Action::from("a"),
            tag as f64,
            State::new().with("tag", tag + 1),
            Vec::new(),
            false,
        )
    }

    fn rewards(buf: &ExperienceBuffer) -> Vec<f64> {
        buf.iter().map(|e| e.reward).collect()
    }

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(
            ExperienceBuffer::new(0).unwrap_err(),
            LearningError::ZeroCapacity
        );
    }

    #[test]
    fn evicts_oldest_first() {
        let mut buf = ExperienceBuffer::new(2).unwrap();
        buf.add(exp(1));
        buf.add(exp(2));
        buf.add(exp(3));
        assert_eq!(rewards(&buf), vec![2.0, 3.0]);
    }

    #[test]
    fn keeps_most_recent_in_order() {
        let mut buf = ExperienceBuffer::new(5).unwrap();
        for i in 0..23 {
            buf.add(exp(i));
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(rewards(&buf), vec![18.0, 19.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn sample_from_empty_is_empty() {
        let buf = ExperienceBuffer::new(4).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(buf.sample_batch(8, &mut rng).is_empty());
    }

    #[test]
    fn sample_is_distinct_and_bounded() {
        let mut buf = ExperienceBuffer::new(10).unwrap();
        for i in 0..6 {
            buf.add(exp(i));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let batch = buf.sample_batch(32, &mut rng);
        assert_eq!(batch.len(), 6);
        let mut seen: Vec<f64> = batch.iter().map(|e| e.reward).collect();
        seen.sort_by(f64::total_cmp);
        seen.dedup();
        assert_eq!(seen.len(), 6);
        // Sampling leaves the buffer untouched.
        assert_eq!(rewards(&buf), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn shrinking_capacity_drops_oldest() {
        let mut buf = ExperienceBuffer::new(4).unwrap();
        for i in 0..4 {
            buf.add(exp(i));
        }
        buf.set_capacity(2).unwrap();
        assert_eq!(rewards(&buf), vec![2.0, 3.0]);
        assert!(buf.set_capacity(0).is_err());
        assert_eq!(buf.capacity(), 2);
    }
}
