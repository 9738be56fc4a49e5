//! The six-phase adaptive cycle.
//!
//! Each call to [`Orchestrator::run_cycle`] runs one iteration:
//!
//! 1. **Input**: snapshot processor metrics, policy statistics and telemetry.
//! 2. **Evaluate**: compare the snapshot against [`Thresholds`], raising [`Flag`]s.
//! 3. **Act**: for each flag, let the learner pick a corrective action and apply it.
//! 4. **Observe**: re-measure each acted-upon flag.
//! 5. **Adapt**: turn every `(before, action, after)` into an experience and
//!    learn from it, then persist the learning state.
//! 6. **Loop**: append the [`CycleRecord`] and advance the iteration counter.
//!
//! A failing phase abandons the iteration; the next call starts afresh.

pub mod actions;
pub mod config;
pub mod cycle;
pub mod error;
pub mod evaluate;
pub mod telemetry;

use std::iter;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::config::{ConfigError, CoreConfig};
use crate::learning::{
    Experience, ExperienceBuffer, LearnerCheckpoint, LearnerStats, LearningParams, PolicyStore,
    PolicySummary, QLearner,
};
use crate::persistence::{schema, PersistenceError, PersistenceProvider};
use crate::processor::{
    HandlerError, ProcessError, ProcessorMetrics, QueueStatus, TaskItem, TaskProcessor, TaskType,
};
use crate::Id;

use actions::ActionContext;
pub use config::OrchestratorConfig;
pub use cycle::{ActionOutcome, CycleHistory, CycleRecord, Observation, TakenAction};
pub use error::CycleError;
pub use evaluate::{evaluate, Evaluation, Flag, Reading, Snapshot, Thresholds};
pub use telemetry::{StaticTelemetry, TelemetryError, TelemetryProvider, TelemetrySnapshot};

/// Which persisted entities [`Orchestrator::restore`] loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<&'static str>,
    /// Missing or unreadable entities that were reset to their defaults.
    pub defaulted: Vec<&'static str>,
}

/// Service object owning the learner, the processor and the cycle state.
pub struct Orchestrator {
    learner: QLearner,
    processor: TaskProcessor,
    telemetry: Arc<dyn TelemetryProvider>,
    persistence: Arc<dyn PersistenceProvider>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    learning_defaults: LearningParams,
    buffer_capacity: usize,
    history: CycleHistory,
    iteration: u64,
    failed_cycles: u64,
}

impl Orchestrator {
    /// Builds the orchestrator and its components from a validated config.
    pub fn new(
        config: CoreConfig,
        telemetry: Arc<dyn TelemetryProvider>,
        persistence: Arc<dyn PersistenceProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let learner = match config.orchestrator.seed {
            Some(seed) => QLearner::seeded(config.learning, config.buffer_capacity, seed),
            None => QLearner::new(config.learning, config.buffer_capacity),
        }
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let processor = TaskProcessor::with_clock(config.processor.clone(), clock.clone());

        Ok(Self {
            learner,
            processor,
            telemetry,
            persistence,
            clock,
            history: CycleHistory::new(config.orchestrator.history_capacity),
            learning_defaults: config.learning,
            buffer_capacity: config.buffer_capacity,
            config: config.orchestrator,
            iteration: 0,
            failed_cycles: 0,
        })
    }

    /// Runs one full iteration of the cycle.
    ///
    /// On error nothing is appended to the history, the iteration counter is
    /// unchanged and `failed_cycles` is incremented.
    #[instrument(skip(self), fields(iteration = self.iteration + 1))]
    pub fn run_cycle(&mut self) -> Result<CycleRecord, CycleError> {
        match self.try_cycle() {
            Ok(record) => Ok(record),
            Err(e) => {
                self.failed_cycles += 1;
                error!(error = %e, failed_cycles = self.failed_cycles, "Cycle aborted");
                Err(e)
            }
        }
    }

    fn try_cycle(&mut self) -> Result<CycleRecord, CycleError> {
        let started = self.clock.now();
        let iteration = self.iteration + 1;
        let thresholds = self.config.thresholds;

        // Input
        let before = self.snapshot().map_err(CycleError::Input)?;

        // Evaluate
        let evaluation = evaluate(&before, &thresholds);
        let flags: Vec<Flag> = evaluation.flags().collect();
        debug!(?flags, "Snapshot evaluated");

        // Act and Observe; learner changes made by actions are undone if
        // either phase fails.
        let mut checkpoint = None;
        let (taken, after) = match self.act_and_observe(&before, flags, &mut checkpoint) {
            Ok(acted) => acted,
            Err(e) => {
                if let Some(checkpoint) = checkpoint {
                    self.learner.rollback(checkpoint);
                    debug!("Learner changes of the abandoned cycle rolled back");
                }
                return Err(e);
            }
        };
        let observations: Vec<Observation> = taken
            .iter()
            .map(|t| {
                let (b, a) = (before.measure(t.flag), after.measure(t.flag));
                let penalty = if t.outcome.is_success() {
                    0.0
                } else {
                    self.config.failure_penalty
                };
                Observation {
                    flag: t.flag,
                    before: b,
                    after: a,
                    delta: b - a,
                    reward: (b - a) - penalty,
                }
            })
            .collect();

        // Adapt
        let observed_at = self.clock.now();
        for (t, obs) in taken.iter().zip(&observations) {
            let experience = Experience::new(
                before.state_for(t.flag, &thresholds),
                t.action.clone(),
                obs.reward,
                after.state_for(t.flag, &thresholds),
                t.flag.actions(),
                false,
            )
            .at(observed_at);
            self.learner.update_from(&experience);
            self.learner.record(experience);
        }
        if !taken.is_empty() && self.config.replay_batch_size > 0 {
            self.learner.train_on_batch(self.config.replay_batch_size);
        }

        let finished = self.clock.now();
        let record = CycleRecord {
            iteration,
            timestamp: started,
            evaluation,
            actions_taken: taken,
            observations,
            duration: (finished - started).to_std().unwrap_or(Duration::ZERO),
        };
        self.persist(&record)?;

        // Loop
        self.history.push(record.clone());
        self.iteration = iteration;
        info!(
            actions = record.actions_taken.len(),
            epsilon = self.learner.params().epsilon,
            "Cycle complete"
        );
        Ok(record)
    }

    /// Runs the Act phase, then takes the Observe snapshot.
    ///
    /// `checkpoint` is filled before the first action that touches the learner.
    fn act_and_observe(
        &mut self,
        before: &Snapshot,
        flags: Vec<Flag>,
        checkpoint: &mut Option<LearnerCheckpoint>,
    ) -> Result<(Vec<TakenAction>, Snapshot), CycleError> {
        let thresholds = self.config.thresholds;
        let mut taken = Vec::with_capacity(flags.len());
        for flag in flags {
            let state = before.state_for(flag, &thresholds);
            let action = self
                .learner
                .choose_action(&state, &flag.actions())
                .map_err(|source| CycleError::Act { flag, source })?;
            if checkpoint.is_none() && actions::touches_learner(&action) {
                *checkpoint = Some(self.learner.checkpoint());
            }
            let mut ctx = ActionContext {
                learner: &mut self.learner,
                processor: &mut self.processor,
                config: &self.config,
            };
            let outcome = actions::execute(&action, &mut ctx);
            info!(%flag, %action, success = outcome.is_success(), "Corrective action taken");
            taken.push(TakenAction {
                flag,
                action,
                outcome,
            });
        }

        let after = self.snapshot().map_err(CycleError::Observe)?;
        Ok((taken, after))
    }

    fn snapshot(&self) -> Result<Snapshot, TelemetryError> {
        let telemetry = self.telemetry.snapshot()?.sanitized();
        let metrics = self.processor.metrics();
        Ok(Snapshot {
            queue_size: self.processor.queue_len(),
            processor_error_rate: metrics.error_rate(),
            result_buffer_size: metrics.buffer_size,
            policy: self.learner.summary(),
            epsilon: self.learner.params().epsilon,
            learning_rate: self.learner.params().learning_rate,
            experiences: self.learner.buffer().len(),
            telemetry,
        })
    }

    /// Saves the learning state and the history including `pending`.
    fn persist(&self, pending: &CycleRecord) -> Result<(), CycleError> {
        let at = self.clock.now();
        let kept = self.history.capacity().saturating_sub(1);
        let history = self.history.recent(kept).into_iter().chain(iter::once(pending));
        let blobs = [
            (
                schema::POLICY_STORE,
                schema::encode_policy_store(self.learner.store(), at),
            ),
            (
                schema::EXPERIENCE_BUFFER,
                schema::encode_experience_buffer(self.learner.buffer(), at),
            ),
            (
                schema::LEARNING_PARAMS,
                schema::encode_learning_params(self.learner.params(), at),
            ),
            (
                schema::CYCLE_HISTORY,
                schema::encode_cycle_history(history, at),
            ),
        ];
        for (key, blob) in blobs {
            let persist_err = |source| CycleError::Persist { key, source };
            let blob = blob.map_err(persist_err)?;
            self.persistence.save(key, &blob).map_err(persist_err)?;
        }
        Ok(())
    }

    /// Loads persisted state, falling back to defaults per entity.
    ///
    /// Missing entities are reset silently; unreadable ones are reset with a
    /// warning. The iteration counter resumes from the restored history.
    pub fn restore(&mut self) -> RestoreReport {
        let mut report = RestoreReport::default();

        let store = self.load_entity(schema::POLICY_STORE, schema::decode_policy_store);
        report.note(schema::POLICY_STORE, store.is_some());
        self.learner.replace_store(store.unwrap_or_default());

        let buffer = self.load_entity(schema::EXPERIENCE_BUFFER, schema::decode_experience_buffer);
        report.note(schema::EXPERIENCE_BUFFER, buffer.is_some());
        let buffer = buffer
            .or_else(|| ExperienceBuffer::new(self.buffer_capacity).ok())
            .unwrap_or_default();
        self.learner.replace_buffer(buffer);

        let params = self.load_entity(schema::LEARNING_PARAMS, schema::decode_learning_params);
        report.note(schema::LEARNING_PARAMS, params.is_some());
        if let Err(e) = self
            .learner
            .set_params(params.unwrap_or(self.learning_defaults))
        {
            warn!(error = %e, "Restored learning parameters rejected; keeping current");
        }

        let history = self.load_entity(schema::CYCLE_HISTORY, schema::decode_cycle_history);
        report.note(schema::CYCLE_HISTORY, history.is_some());
        self.history.replace(history.unwrap_or_default());
        self.iteration = self.history.last().map_or(0, |r| r.iteration);

        info!(
            restored = ?report.restored,
            defaulted = ?report.defaulted,
            iteration = self.iteration,
            "State restored"
        );
        report
    }

    fn load_entity<T>(
        &self,
        key: &'static str,
        decode: fn(&[u8]) -> Result<T, PersistenceError>,
    ) -> Option<T> {
        match self.persistence.load(key) {
            Ok(Some(bytes)) => match decode(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Stored entity unreadable; using default");
                    None
                }
            },
            Ok(None) => {
                debug!(key, "Nothing stored; using default");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to load entity; using default");
                None
            }
        }
    }

    /// Queues a task on the processor.
    pub fn enqueue(&mut self, task_type: impl Into<TaskType>, payload: Value) -> Id {
        self.processor.enqueue(task_type, payload)
    }

    /// Registers the handler for `task_type` on the processor.
    pub fn register_handler<F>(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut(&TaskItem) -> Result<Value, HandlerError> + Send + 'static,
    {
        self.processor.register_handler(task_type, handler)
    }

    /// Runs one processor batch with the configured limits.
    pub fn process_tick(&mut self) -> usize {
        self.processor.tick()
    }

    /// Processor counters.
    pub fn metrics(&self) -> &ProcessorMetrics {
        self.processor.metrics()
    }

    /// Q-table statistics.
    pub fn policy_summary(&self) -> PolicySummary {
        self.learner.summary()
    }

    /// The most recent `limit` cycles, oldest first.
    pub fn cycle_history(&self, limit: usize) -> Vec<&CycleRecord> {
        self.history.recent(limit)
    }

    /// Queue depth by type plus processor counters.
    pub fn queue_status(&self) -> QueueStatus {
        self.processor.queue_status()
    }

    /// Learner hyperparameters and progress.
    pub fn learner_stats(&self) -> LearnerStats {
        self.learner.stats()
    }

    /// Completed iterations.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Cycles abandoned since construction.
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles
    }

    /// Cycle settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The learner.
    pub fn learner(&self) -> &QLearner {
        &self.learner
    }

    /// Mutable access to the learner.
    pub fn learner_mut(&mut self) -> &mut QLearner {
        &mut self.learner
    }

    /// The task processor.
    pub fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    /// Mutable access to the task processor.
    pub fn processor_mut(&mut self) -> &mut TaskProcessor {
        &mut self.processor
    }

    /// The learner's Q-table.
    pub fn policy_store(&self) -> &PolicyStore {
        self.learner.store()
    }
}

impl RestoreReport {
    fn note(&mut self, key: &'static str, restored: bool) {
        if restored {
            self.restored.push(key);
        } else {
            self.defaulted.push(key);
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("iteration", &self.iteration)
            .field("failed_cycles", &self.failed_cycles)
            .field("processor", &self.processor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::learning::{Action, State};
    use crate::persistence::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Answers the first snapshot of every cycle, then fails while armed.
    #[derive(Default)]
    struct LosesSensorMidCycle {
        calls: AtomicUsize,
        armed: AtomicBool,
    }

    impl TelemetryProvider for LosesSensorMidCycle {
        fn snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.armed.load(Ordering::SeqCst) && call % 2 == 1 {
                Err(TelemetryError::Unavailable("sensor lost".into()))
            } else {
                Ok(TelemetrySnapshot::default())
            }
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        telemetry: Arc<StaticTelemetry>,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        let mut config = CoreConfig::default();
        config.orchestrator.seed = Some(11);
        let telemetry = Arc::new(StaticTelemetry::default());
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Orchestrator::new(
            config,
            telemetry.clone(),
            store.clone(),
            Arc::new(ManualClock::at_epoch()),
        )
        .unwrap();
        Harness {
            orchestrator,
            telemetry,
            store,
        }
    }

    #[test]
    fn quiet_cycle_acts_on_nothing_but_persists() {
        let mut h = harness();
        let record = h.orchestrator.run_cycle().unwrap();
        assert_eq!(record.iteration, 1);
        assert!(record.actions_taken.is_empty());
        assert_eq!(h.orchestrator.iteration(), 1);
        assert_eq!(
            h.store.keys(),
            vec![
                "cycle_history",
                "experience_buffer",
                "learning_params",
                "policy_store"
            ]
        );
    }

    #[test]
    fn raised_flag_is_acted_on_and_learned_from() {
        let mut h = harness();
        h.telemetry.set(TelemetrySnapshot {
            response_time: 5.0,
            ..TelemetrySnapshot::default()
        });
        let record = h.orchestrator.run_cycle().unwrap();
        assert_eq!(record.actions_taken.len(), 1);
        assert_eq!(record.actions_taken[0].flag, Flag::ResponseTime);
        assert_eq!(record.observations.len(), 1);
        // Telemetry did not change, so the only reward is the failure penalty.
        let obs = record.observations[0];
        assert_eq!(obs.delta, 0.0);
        let expected = if record.actions_taken[0].outcome.is_success() {
            0.0
        } else {
            -1.0
        };
        assert_eq!(obs.reward, expected);
        let stats = h.orchestrator.learner_stats();
        assert_eq!(stats.total_experiences, 1);
        assert!(stats.total_updates >= 1);
        assert!(stats.epsilon < 0.1);
    }

    #[test]
    fn telemetry_outage_aborts_then_recovers() {
        let mut h = harness();
        h.telemetry.set_unavailable();
        assert!(matches!(
            h.orchestrator.run_cycle(),
            Err(CycleError::Input(_))
        ));
        assert_eq!(h.orchestrator.failed_cycles(), 1);
        assert_eq!(h.orchestrator.iteration(), 0);
        assert!(h.orchestrator.cycle_history(10).is_empty());
        assert!(h.store.is_empty());

        h.telemetry.set(TelemetrySnapshot::default());
        let record = h.orchestrator.run_cycle().unwrap();
        assert_eq!(record.iteration, 1);
        assert_eq!(h.orchestrator.failed_cycles(), 1);
    }

    #[test]
    fn restore_resumes_iteration_count() {
        let mut h = harness();
        for _ in 0..3 {
            h.orchestrator.run_cycle().unwrap();
        }
        let mut config = CoreConfig::default();
        config.orchestrator.seed = Some(11);
        let mut fresh = Orchestrator::new(
            config,
            h.telemetry.clone(),
            h.store.clone(),
            Arc::new(ManualClock::at_epoch()),
        )
        .unwrap();
        let report = fresh.restore();
        assert_eq!(report.restored.len(), 4);
        assert!(report.defaulted.is_empty());
        assert_eq!(fresh.iteration(), 3);
        assert_eq!(fresh.cycle_history(10).len(), 3);
        assert_eq!(fresh.run_cycle().unwrap().iteration, 4);
    }

    #[test]
    fn restore_from_empty_store_defaults_everything() {
        let mut h = harness();
        let report = h.orchestrator.restore();
        assert!(report.restored.is_empty());
        assert_eq!(report.defaulted.len(), 4);
        assert_eq!(h.orchestrator.iteration(), 0);
        assert_eq!(h.orchestrator.learner().buffer().capacity(), 10_000);
    }

    #[test]
    fn corrupt_entity_falls_back_to_default() {
        let mut h = harness();
        h.orchestrator.run_cycle().unwrap();
        h.store.save(schema::LEARNING_PARAMS, b"garbage").unwrap();
        let report = h.orchestrator.restore();
        assert_eq!(report.defaulted, vec![schema::LEARNING_PARAMS]);
        assert_eq!(h.orchestrator.learner().params().learning_rate, 0.01);
    }

    #[test]
    fn observe_failure_rolls_back_replay() {
        let mut config = CoreConfig::default();
        config.orchestrator.seed = Some(11);
        config.learning.epsilon = 0.0;
        config.learning.epsilon_min = 0.0;
        let telemetry = Arc::new(LosesSensorMidCycle::default());
        telemetry.armed.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = Orchestrator::new(
            config,
            telemetry.clone(),
            store.clone(),
            Arc::new(ManualClock::at_epoch()),
        )
        .unwrap();

        // Spread the Q-table so the variance flag is raised.
        let filler = Action::new("a");
        let learner = orchestrator.learner_mut();
        learner.set_value(&State::new().with("s", 1), &filler, 100.0);
        learner.set_value(&State::new().with("s", 2), &filler, -100.0);
        let x = State::new().with("s", 3);
        learner.record(Experience::new(x.clone(), filler.clone(), 7.0, x.clone(), Vec::new(), true));

        // Make the greedy choice in the variance state `replay_batch`.
        let thresholds = orchestrator.config().thresholds;
        let state = orchestrator
            .snapshot()
            .unwrap()
            .state_for(Flag::QValueVariance, &thresholds);
        let replay = Action::new("replay_batch");
        orchestrator.learner_mut().set_value(&state, &replay, 100.0);
        telemetry.calls.store(0, Ordering::SeqCst);

        let store_before = orchestrator.policy_store().clone();
        let stats_before = orchestrator.learner_stats();

        assert!(matches!(
            orchestrator.run_cycle(),
            Err(CycleError::Observe(_))
        ));
        assert_eq!(orchestrator.learner().get_value(&x, &filler), 0.0);
        assert_eq!(orchestrator.policy_store(), &store_before);
        assert_eq!(orchestrator.learner_stats(), stats_before);
        assert_eq!(orchestrator.iteration(), 0);
        assert!(store.is_empty());

        telemetry.armed.store(false, Ordering::SeqCst);
        let record = orchestrator.run_cycle().unwrap();
        assert_eq!(record.iteration, 1);
        assert_eq!(record.actions_taken[0].action, replay);
        assert!(orchestrator.learner().get_value(&x, &filler) > 0.0);
    }

    #[test]
    fn non_finite_telemetry_keeps_history_restorable() {
        let mut h = harness();
        h.telemetry.set(TelemetrySnapshot {
            response_time: f64::NAN,
            cpu_usage: f64::INFINITY,
            ..TelemetrySnapshot::default()
        });
        for _ in 0..2 {
            let record = h.orchestrator.run_cycle().unwrap();
            assert!(record.evaluation.readings.iter().all(|r| r.value.is_finite()));
        }

        let mut config = CoreConfig::default();
        config.orchestrator.seed = Some(11);
        let mut fresh = Orchestrator::new(
            config,
            h.telemetry.clone(),
            h.store.clone(),
            Arc::new(ManualClock::at_epoch()),
        )
        .unwrap();
        let report = fresh.restore();
        assert!(report.defaulted.is_empty());
        assert_eq!(fresh.iteration(), 2);
    }
}
