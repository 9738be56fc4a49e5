//! Periodic driver for the processor and the cycle.
//!
//! The scheduler owns no thread. A host calls [`Scheduler::run_pending`] as
//! often as it likes; each job runs at most once per call when its period has
//! elapsed on the injected [`Clock`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::orchestrator::{CycleError, CycleRecord, Orchestrator};

/// Periods of the two scheduled jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub processing_interval_secs: u64,
    pub cycle_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            processing_interval_secs: 15,
            cycle_interval_secs: 30,
        }
    }
}

impl SchedulerConfig {
    /// Period of the processing job.
    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs(self.processing_interval_secs)
    }

    /// Period of the cycle job.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// One processor batch.
    Process,
    /// One orchestrator cycle.
    Cycle,
}

/// What a scheduled job did.
#[derive(Debug)]
pub enum JobOutcome {
    Processed(usize),
    Cycle(Result<CycleRecord, CycleError>),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    job: Job,
    interval: chrono::Duration,
    next_due: DateTime<Utc>,
}

/// Tick-driven scheduler with an injectable clock.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    slots: Vec<Slot>,
    running: bool,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    pub fn new(clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            clock,
            config,
            slots: Vec::new(),
            running: false,
        }
    }

    /// Starts both jobs; each is due immediately.
    ///
    /// Starting a running scheduler is a no-op.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        let now = self.clock.now();
        let slot = |job, interval: Duration| Slot {
            job,
            interval: chrono::Duration::from_std(interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(1))
                .max(chrono::Duration::milliseconds(1)),
            next_due: now,
        };
        // Processing first so a cycle sees the freshest queue.
        self.slots = vec![
            slot(Job::Process, self.config.processing_interval()),
            slot(Job::Cycle, self.config.cycle_interval()),
        ];
        self.running = true;
        info!(
            processing_secs = self.config.processing_interval_secs,
            cycle_secs = self.config.cycle_interval_secs,
            "Scheduler started"
        );
    }

    /// Unschedules both jobs.
    pub fn stop(&mut self) {
        if self.running {
            self.slots.clear();
            self.running = false;
            info!("Scheduler stopped");
        }
    }

    /// Whether [`Scheduler::start`] was called without a later stop.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Jobs whose period has elapsed, in run order.
    pub fn due_jobs(&self) -> Vec<Job> {
        let now = self.clock.now();
        self.slots
            .iter()
            .filter(|s| s.next_due <= now)
            .map(|s| s.job)
            .collect()
    }

    /// When `job` next runs, if scheduled.
    pub fn next_due(&self, job: Job) -> Option<DateTime<Utc>> {
        self.slots.iter().find(|s| s.job == job).map(|s| s.next_due)
    }

    /// Runs every due job once against `orchestrator`.
    ///
    /// Missed periods are skipped rather than replayed: after running, a job
    /// is rescheduled to the first period boundary strictly after now.
    pub fn run_pending(&mut self, orchestrator: &mut Orchestrator) -> Vec<(Job, JobOutcome)> {
        let now = self.clock.now();
        let mut outcomes = Vec::new();
        for slot in self.slots.iter_mut().filter(|s| s.next_due <= now) {
            let outcome = match slot.job {
                Job::Process => JobOutcome::Processed(orchestrator.process_tick()),
                Job::Cycle => JobOutcome::Cycle(orchestrator.run_cycle()),
            };
            while slot.next_due <= now {
                slot.next_due += slot.interval;
            }
            debug!(job = ?slot.job, next_due = %slot.next_due, "Job ran");
            outcomes.push((slot.job, outcome));
        }
        outcomes
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running", &self.running)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}
