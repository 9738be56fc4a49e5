//! Corrective actions executed in the Act phase.

use std::time::Duration;

use tracing::debug;

use super::config::OrchestratorConfig;
use super::cycle::ActionOutcome;
use crate::learning::{Action, QLearner};
use crate::processor::TaskProcessor;

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 100_000;
const MIN_TIME_BUDGET: Duration = Duration::from_millis(10);
const MAX_TIME_BUDGET: Duration = Duration::from_secs(60);
const MIN_BUFFER_CAPACITY: usize = 100;
const MAX_BUFFER_CAPACITY: usize = 1_000_000;
const BOOST_FACTOR: f64 = 1.5;

/// Mutable view of the components an action may adjust.
pub struct ActionContext<'a> {
    pub learner: &'a mut QLearner,
    pub processor: &'a mut TaskProcessor,
    pub config: &'a OrchestratorConfig,
}

/// Applies `action` and reports whether it took effect.
///
/// An action that would leave its target unchanged (already at a bound,
/// nothing to drain or replay) is a failure.
pub fn execute(action: &Action, ctx: &mut ActionContext<'_>) -> ActionOutcome {
    let outcome = match action.as_str() {
        "hold" => ActionOutcome::Success,
        "drain_extra_batch" => drain_extra_batch(ctx),
        "grow_batch_size" => resize_batch(ctx, |n| n.saturating_mul(2)),
        "shrink_batch_size" => resize_batch(ctx, |n| n / 2),
        "boost_backlog_priority" => boost_backlog_priority(ctx),
        "clear_result_buffer" => {
            if ctx.processor.clear_results() == 0 {
                ActionOutcome::failure("result buffer already empty")
            } else {
                ActionOutcome::Success
            }
        }
        "lower_learning_rate" => scale_learning_rate(ctx, 0.5),
        "raise_learning_rate" => scale_learning_rate(ctx, 1.5),
        "replay_batch" => {
            if ctx.learner.train_on_batch(ctx.config.replay_batch_size) == 0 {
                ActionOutcome::failure("no experiences to replay")
            } else {
                ActionOutcome::Success
            }
        }
        "shrink_experience_buffer" => resize_buffer(ctx, |n| n / 2),
        "grow_experience_buffer" => resize_buffer(ctx, |n| n.saturating_mul(2)),
        "shrink_time_budget" => resize_time_budget(ctx, 0.5),
        "grow_time_budget" => resize_time_budget(ctx, 2.0),
        other => ActionOutcome::failure(format!("unknown action {other}")),
    };
    debug!(action = %action, success = outcome.is_success(), "Action executed");
    outcome
}

/// Whether `action` changes the learner's Q-table, buffer or parameters.
pub fn touches_learner(action: &Action) -> bool {
    matches!(
        action.as_str(),
        "lower_learning_rate"
            | "raise_learning_rate"
            | "replay_batch"
            | "shrink_experience_buffer"
            | "grow_experience_buffer"
    )
}

fn drain_extra_batch(ctx: &mut ActionContext<'_>) -> ActionOutcome {
    if ctx.processor.queue_len() == 0 {
        return ActionOutcome::failure("queue empty");
    }
    match ctx.processor.tick() {
        0 => ActionOutcome::failure("no item handled"),
        _ => ActionOutcome::Success,
    }
}

fn resize_batch(ctx: &mut ActionContext<'_>, f: impl Fn(usize) -> usize) -> ActionOutcome {
    let current = ctx.processor.max_items_per_tick();
    let next = f(current).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
    if next == current {
        return ActionOutcome::failure(format!("batch size already at bound {current}"));
    }
    ctx.processor.set_max_items_per_tick(next);
    ActionOutcome::Success
}

fn boost_backlog_priority(ctx: &mut ActionContext<'_>) -> ActionOutcome {
    let Some(task_type) = ctx.processor.most_backlogged_type() else {
        return ActionOutcome::failure("queue empty");
    };
    let boosted = ctx.processor.type_weight(&task_type) * BOOST_FACTOR;
    match ctx.processor.set_type_weight(task_type, boosted) {
        Ok(()) => ActionOutcome::Success,
        Err(e) => ActionOutcome::failure(e.to_string()),
    }
}

fn scale_learning_rate(ctx: &mut ActionContext<'_>, factor: f64) -> ActionOutcome {
    let (lo, hi) = ctx.config.learning_rate_bounds;
    let params = ctx.learner.params_mut();
    let current = params.learning_rate;
    params.set_learning_rate_clamped(current * factor, lo, hi);
    if params.learning_rate == current {
        ActionOutcome::failure(format!("learning rate already at bound {current}"))
    } else {
        ActionOutcome::Success
    }
}

fn resize_buffer(ctx: &mut ActionContext<'_>, f: impl Fn(usize) -> usize) -> ActionOutcome {
    let current = ctx.learner.buffer().capacity();
    let next = f(current).clamp(MIN_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY);
    if next == current {
        return ActionOutcome::failure(format!("buffer capacity already at bound {current}"));
    }
    match ctx.learner.buffer_mut().set_capacity(next) {
        Ok(()) => ActionOutcome::Success,
        Err(e) => ActionOutcome::failure(e.to_string()),
    }
}

fn resize_time_budget(ctx: &mut ActionContext<'_>, factor: f64) -> ActionOutcome {
    let current = ctx.processor.time_budget();
    if current == Duration::MAX {
        return ActionOutcome::failure("time budget is unbounded");
    }
    let next = Duration::try_from_secs_f64(current.as_secs_f64() * factor)
        .unwrap_or(MAX_TIME_BUDGET)
        .clamp(MIN_TIME_BUDGET, MAX_TIME_BUDGET);
    if next == current {
        return ActionOutcome::failure(format!("time budget already at bound {current:?}"));
    }
    ctx.processor.set_time_budget(next);
    ActionOutcome::Success
}
