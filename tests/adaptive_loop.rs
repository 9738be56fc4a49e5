//! End-to-end behaviour of the processor, the cycle and persistence together.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adaptloop::learning::{Action, Experience, State};
use adaptloop::orchestrator::{
    CycleError, Flag, StaticTelemetry, TelemetryError, TelemetryProvider, TelemetrySnapshot,
};
use adaptloop::persistence::{
    schema, FileStore, MemoryStore, PersistenceError, PersistenceProvider,
};
use adaptloop::processor::{TaskItem, TaskType};
use adaptloop::scheduler::{Job, JobOutcome};
use adaptloop::{CoreConfig, ManualClock, Orchestrator, Scheduler};
use serde_json::{json, Value};

/// Memory store whose saves can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PersistenceProvider for FlakyStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io {
                key: key.to_owned(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.save(key, blob)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.inner.load(key)
    }
}

/// Telemetry whose second reading of a cycle fails while `dropping` is set.
#[derive(Default)]
struct DropsObserveReading {
    calls: AtomicUsize,
    dropping: AtomicBool,
}

impl TelemetryProvider for DropsObserveReading {
    fn snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.dropping.load(Ordering::SeqCst) && call % 2 == 1 {
            return Err(TelemetryError::Unavailable("collector restarted".into()));
        }
        Ok(TelemetrySnapshot::default())
    }
}

fn config(seed: u64) -> CoreConfig {
    let mut config = CoreConfig::default();
    config.orchestrator.seed = Some(seed);
    config.processor.max_items_per_tick = 10;
    config
}

fn build(
    seed: u64,
    telemetry: Arc<dyn TelemetryProvider>,
    store: Arc<dyn PersistenceProvider>,
) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(
        config(seed),
        telemetry,
        store,
        Arc::new(ManualClock::at_epoch()),
    )
    .unwrap();
    for t in [TaskType::REINFORCEMENT_UPDATE, TaskType::DATA_PROCESSING] {
        orchestrator
            .register_handler(t, |_: &TaskItem| Ok(json!("done")))
            .unwrap();
    }
    orchestrator
}

fn flood(orchestrator: &mut Orchestrator, n: usize) {
    for i in 0..n {
        let t = if i % 3 == 0 {
            TaskType::REINFORCEMENT_UPDATE
        } else {
            TaskType::DATA_PROCESSING
        };
        orchestrator.enqueue(t, json!({ "n": i }));
    }
}

#[test]
fn backlog_cycles_take_legal_actions_and_learn() {
    let telemetry = Arc::new(StaticTelemetry::default());
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator = build(3, telemetry, store.clone());
    flood(&mut orchestrator, 400);

    let mut backlog_cycles = 0;
    let mut actions_taken = 0;
    for _ in 0..20 {
        let record = orchestrator.run_cycle().unwrap();
        actions_taken += record.actions_taken.len();
        if record
            .actions_taken
            .iter()
            .any(|a| a.flag == Flag::QueueBacklog)
        {
            backlog_cycles += 1;
            let legal = Flag::QueueBacklog.actions();
            assert!(record
                .actions_taken
                .iter()
                .filter(|a| a.flag == Flag::QueueBacklog)
                .all(|a| legal.contains(&a.action)));
        }
        orchestrator.process_tick();
    }

    assert!(backlog_cycles > 0);
    assert_eq!(orchestrator.iteration(), 20);
    assert_eq!(orchestrator.failed_cycles(), 0);
    assert_eq!(orchestrator.cycle_history(5).len(), 5);
    assert_eq!(orchestrator.cycle_history(5)[4].iteration, 20);

    let stats = orchestrator.learner_stats();
    // One experience per action; the buffer never shrinks below 100.
    assert_eq!(stats.total_experiences, actions_taken);
    assert!(stats.epsilon < 0.1);
    assert!(stats.epsilon >= 0.01);
    assert!(orchestrator.policy_summary().entries > 0);
    assert_eq!(store.len(), 4);
}

#[test]
fn failed_save_keeps_learning_but_not_the_record() {
    let telemetry = Arc::new(StaticTelemetry::default());
    let store = Arc::new(FlakyStore::default());
    let mut orchestrator = build(5, telemetry, store.clone());
    flood(&mut orchestrator, 200);

    store.set_failing(true);
    let err = orchestrator.run_cycle().unwrap_err();
    assert!(matches!(
        err,
        CycleError::Persist {
            key: schema::POLICY_STORE,
            ..
        }
    ));
    assert_eq!(orchestrator.failed_cycles(), 1);
    assert_eq!(orchestrator.iteration(), 0);
    assert!(orchestrator.cycle_history(10).is_empty());
    // The update happened in memory before the save.
    assert_eq!(orchestrator.learner_stats().total_experiences, 1);

    store.set_failing(false);
    let record = orchestrator.run_cycle().unwrap();
    assert_eq!(record.iteration, 1);
    assert_eq!(orchestrator.failed_cycles(), 1);
}

#[test]
fn telemetry_outage_at_input_discards_iteration() {
    let telemetry = Arc::new(StaticTelemetry::unavailable());
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator = build(7, telemetry.clone(), store.clone());

    for _ in 0..3 {
        assert!(matches!(
            orchestrator.run_cycle(),
            Err(CycleError::Input(_))
        ));
    }
    assert_eq!(orchestrator.failed_cycles(), 3);
    assert!(store.is_empty());

    telemetry.set(TelemetrySnapshot::from_fields(&json!({ "response_time": 4.5 })));
    let record = orchestrator.run_cycle().unwrap();
    assert_eq!(record.iteration, 1);
    assert_eq!(record.actions_taken[0].flag, Flag::ResponseTime);
}

#[test]
fn observe_failure_leaves_learning_untouched() {
    let telemetry = Arc::new(DropsObserveReading::default());
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator = build(13, telemetry.clone(), store.clone());
    flood(&mut orchestrator, 300);

    // A wide Q-table raises the variance flag, whose actions all touch the learner.
    let learner = orchestrator.learner_mut();
    let a = Action::new("a");
    learner.set_value(&State::new().with("s", 1), &a, 50.0);
    learner.set_value(&State::new().with("s", 2), &a, -50.0);
    for i in 0..40 {
        let s = State::new().with("s", i);
        learner.record(Experience::new(s.clone(), a.clone(), 3.0, s, Vec::new(), true));
    }

    let policy_before = orchestrator.policy_store().clone();
    let params_before = *orchestrator.learner().params();
    let stats_before = orchestrator.learner_stats();
    let capacity_before = orchestrator.learner().buffer().capacity();

    telemetry.dropping.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        assert!(matches!(
            orchestrator.run_cycle(),
            Err(CycleError::Observe(_))
        ));
        assert_eq!(orchestrator.policy_store(), &policy_before);
        assert_eq!(orchestrator.learner().params(), &params_before);
        assert_eq!(orchestrator.learner_stats(), stats_before);
        assert_eq!(orchestrator.learner().buffer().capacity(), capacity_before);
    }
    assert_eq!(orchestrator.failed_cycles(), 3);
    assert_eq!(orchestrator.iteration(), 0);
    assert!(orchestrator.cycle_history(10).is_empty());
    assert!(store.is_empty());

    telemetry.dropping.store(false, Ordering::SeqCst);
    let record = orchestrator.run_cycle().unwrap();
    assert_eq!(record.iteration, 1);
    assert!(record
        .actions_taken
        .iter()
        .any(|t| t.flag == Flag::QValueVariance));
    assert!(orchestrator.process_tick() > 0);
    assert_eq!(store.len(), 4);
}

#[test]
fn same_seed_same_decisions() {
    let run = || {
        let telemetry = Arc::new(StaticTelemetry::new(TelemetrySnapshot {
            response_time: 3.0,
            error_rate: 0.2,
            ..TelemetrySnapshot::default()
        }));
        let mut orchestrator = build(42, telemetry, Arc::new(MemoryStore::new()));
        flood(&mut orchestrator, 300);
        let mut chosen: Vec<Action> = Vec::new();
        for _ in 0..10 {
            let record = orchestrator.run_cycle().unwrap();
            chosen.extend(record.actions_taken.into_iter().map(|a| a.action));
        }
        chosen
    };
    let first = run();
    assert!(!first.is_empty());
    assert_eq!(first, run());
}

#[test]
fn file_store_round_trip_restores_learning() {
    let dir = std::env::temp_dir().join(format!("adaptloop-it-{}", adaptloop::generate_id()));
    let telemetry = Arc::new(StaticTelemetry::new(TelemetrySnapshot {
        response_time: 2.5,
        ..TelemetrySnapshot::default()
    }));

    let (store_before, buffer_len, epsilon) = {
        let store = Arc::new(FileStore::new(&dir).unwrap());
        let mut orchestrator = build(9, telemetry.clone(), store);
        flood(&mut orchestrator, 250);
        for _ in 0..6 {
            orchestrator.run_cycle().unwrap();
        }
        (
            orchestrator.policy_store().clone(),
            orchestrator.learner().buffer().len(),
            orchestrator.learner().params().epsilon,
        )
    };

    let store = Arc::new(FileStore::new(&dir).unwrap());
    let mut restored = build(9, telemetry, store);
    let report = restored.restore();
    assert_eq!(report.restored.len(), 4);
    assert_eq!(restored.policy_store(), &store_before);
    assert_eq!(restored.learner().buffer().len(), buffer_len);
    assert_eq!(restored.learner().params().epsilon, epsilon);
    assert_eq!(restored.iteration(), 6);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn scheduler_drives_both_jobs_on_simulated_time() {
    let clock = Arc::new(ManualClock::at_epoch());
    let mut orchestrator = Orchestrator::new(
        config(1),
        Arc::new(StaticTelemetry::default()),
        Arc::new(MemoryStore::new()),
        clock.clone(),
    )
    .unwrap();
    orchestrator
        .register_handler("work", |t: &TaskItem| Ok(t.payload.clone()))
        .unwrap();
    for _ in 0..35 {
        orchestrator.enqueue("work", Value::Null);
    }

    let mut scheduler = Scheduler::new(clock.clone(), config(1).scheduler);
    scheduler.start();
    let mut processed = 0;
    // Two simulated minutes at one-second resolution.
    for _ in 0..120 {
        for (job, outcome) in scheduler.run_pending(&mut orchestrator) {
            match (job, outcome) {
                (Job::Process, JobOutcome::Processed(n)) => processed += n,
                (Job::Cycle, JobOutcome::Cycle(result)) => {
                    result.unwrap();
                }
                other => panic!("mismatched outcome {other:?}"),
            }
        }
        clock.advance(Duration::from_secs(1));
    }

    // Process ticks at 0, 15, ..., 105 drain 10 items each.
    assert_eq!(processed, 35);
    assert_eq!(orchestrator.iteration(), 4);
    assert_eq!(orchestrator.queue_status().queue_size, 0);
}
