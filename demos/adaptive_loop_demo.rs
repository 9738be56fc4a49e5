// Demonstration: drive the processor and the adaptive cycle on simulated time.
//
// Run from the repo root:
//   RUST_LOG=adaptloop=info cargo run --example adaptive_loop_demo -- --minutes 10 --seed 42

use std::env;
use std::sync::Arc;
use std::time::Duration;

use adaptloop::orchestrator::{StaticTelemetry, TelemetrySnapshot};
use adaptloop::persistence::MemoryStore;
use adaptloop::processor::{HandlerError, TaskItem, TaskType};
use adaptloop::scheduler::{Job, JobOutcome};
use adaptloop::{CoreConfig, ManualClock, Orchestrator, Scheduler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = env::args().collect();
    let minutes: u64 = arg_value(&args, "--minutes")
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);
    let seed: u64 = arg_value(&args, "--seed")
        .and_then(|s| s.parse().ok())
        .unwrap_or(42);

    let mut config = CoreConfig::default();
    config.orchestrator.seed = Some(seed);
    config.processor.max_items_per_tick = 50;
    if let Err(e) = config.apply_env_overrides() {
        eprintln!("Bad environment override: {e}");
        std::process::exit(2);
    }

    let clock = Arc::new(ManualClock::at_epoch());
    let telemetry = Arc::new(StaticTelemetry::default());
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator =
        match Orchestrator::new(config.clone(), telemetry.clone(), store.clone(), clock.clone()) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("Invalid configuration: {e}");
                std::process::exit(2);
            }
        };

    // Handlers: learning work always succeeds, data processing is flaky.
    let mut flaky = StdRng::seed_from_u64(seed ^ 0xdead_beef);
    let registrations = [
        orchestrator.register_handler(TaskType::REINFORCEMENT_UPDATE, |t: &TaskItem| {
            Ok(json!({ "applied": t.payload["reward"] }))
        }),
        orchestrator.register_handler(TaskType::LEARNING_UPDATE, |_: &TaskItem| {
            Ok(json!("ok"))
        }),
        orchestrator.register_handler(TaskType::DATA_PROCESSING, move |_: &TaskItem| {
            if flaky.gen_bool(0.1) {
                Err(HandlerError::new("upstream timeout"))
            } else {
                Ok(json!("ok"))
            }
        }),
    ];
    if let Some(Err(e)) = registrations.into_iter().find(Result::is_err) {
        eprintln!("Handler registration failed: {e}");
        std::process::exit(1);
    }

    let mut scheduler = Scheduler::new(clock.clone(), config.scheduler.clone());
    scheduler.start();

    let mut load = StdRng::seed_from_u64(seed);
    let step = Duration::from_secs(5);
    let mut cycles_failed = 0;
    for tick in 0..(minutes * 60 / step.as_secs()) {
        // Bursty arrivals.
        let arrivals = if tick % 24 < 6 { 80 } else { 10 };
        for _ in 0..arrivals {
            let task_type = match load.gen_range(0..10) {
                0..=1 => TaskType::REINFORCEMENT_UPDATE,
                2..=4 => TaskType::LEARNING_UPDATE,
                _ => TaskType::DATA_PROCESSING,
            };
            orchestrator.enqueue(task_type, json!({ "urgency": load.gen_range(0.5..2.0), "reward": 1 }));
        }
        telemetry.set(TelemetrySnapshot::from_fields(&json!({
            "cpu_usage": load.gen_range(0.2..0.9),
            "response_time": 1.0 + orchestrator.queue_status().queue_size as f64 / 100.0,
        })));

        for (job, outcome) in scheduler.run_pending(&mut orchestrator) {
            if let (Job::Cycle, JobOutcome::Cycle(Err(e))) = (job, outcome) {
                eprintln!("cycle failed: {e}");
                cycles_failed += 1;
            }
        }
        clock.advance(step);
    }

    println!("Simulated {minutes} minute(s), seed {seed}");
    println!("{}", orchestrator.metrics());
    println!("=== Learner ===");
    let stats = orchestrator.learner_stats();
    println!("  Epsilon:           {:.4}", stats.epsilon);
    println!("  Learning rate:     {:.4}", stats.learning_rate);
    println!("  Experiences:       {}", stats.total_experiences);
    println!("  Updates:           {}", stats.total_updates);
    println!("  Average reward:    {:.3}", stats.average_reward);
    let summary = orchestrator.policy_summary();
    println!("  Q-table:           {} states, {} entries", summary.states, summary.entries);
    println!("=== Cycles ===");
    println!("  Completed:         {}", orchestrator.iteration());
    println!("  Failed:            {cycles_failed}");
    for record in orchestrator.cycle_history(5) {
        let actions: Vec<String> = record
            .actions_taken
            .iter()
            .map(|a| format!("{}→{}", a.flag, a.action))
            .collect();
        println!("  #{:<4} {}", record.iteration, actions.join(", "));
    }
    println!("  Persisted keys:    {}", store.keys().join(", "));
}

fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
