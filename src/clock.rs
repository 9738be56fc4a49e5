//! Time sources.
//!
//! Everything that measures elapsed time or stamps records goes through a
//! [`Clock`], so tests can drive the processor, orchestrator and scheduler
//! without real time passing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A source of wall-clock timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the non-negative time elapsed since `since`.
    fn elapsed_since(&self, since: DateTime<Utc>) -> Duration {
        (self.now() - since).to_std().unwrap_or(Duration::ZERO)
    }
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for deterministic tests and simulations.
///
/// Optionally advances by a fixed `step` every time it is read, which lets a
/// test model handlers that each take a known amount of time.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    step: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            step: Mutex::new(Duration::ZERO),
        }
    }

    /// Creates a clock frozen at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }

    /// Makes every subsequent [`Clock::now`] call advance the clock by `step`.
    pub fn set_auto_step(&self, step: Duration) {
        *self.step.lock() = step;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let step = *self.step.lock();
        let mut now = self.now.lock();
        let current = *now;
        if !step.is_zero() {
            *now += chrono::Duration::from_std(step).unwrap_or(chrono::Duration::zero());
        }
        current
    }
}
