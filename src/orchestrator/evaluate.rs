//! Input snapshot and threshold evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::telemetry::TelemetrySnapshot;
use crate::learning::{Action, PolicySummary, State};

/// A condition the orchestrator tries to correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    QueueBacklog,
    ErrorRate,
    QValueVariance,
    ResponseTime,
}

impl Flag {
    /// Every flag, in evaluation order.
    pub const ALL: [Flag; 4] = [
        Flag::QueueBacklog,
        Flag::ErrorRate,
        Flag::QValueVariance,
        Flag::ResponseTime,
    ];

    /// Stable snake_case name used in states and logs.
    pub fn name(self) -> &'static str {
        match self {
            Flag::QueueBacklog => "queue_backlog",
            Flag::ErrorRate => "error_rate",
            Flag::QValueVariance => "q_value_variance",
            Flag::ResponseTime => "response_time",
        }
    }

    /// Names of the corrective actions legal for this flag.
    pub fn action_names(self) -> &'static [&'static str] {
        match self {
            Flag::QueueBacklog => &[
                "drain_extra_batch",
                "grow_batch_size",
                "boost_backlog_priority",
                "hold",
            ],
            Flag::ErrorRate => &["shrink_batch_size", "clear_result_buffer", "hold"],
            Flag::QValueVariance => &[
                "lower_learning_rate",
                "raise_learning_rate",
                "replay_batch",
                "shrink_experience_buffer",
                "grow_experience_buffer",
            ],
            Flag::ResponseTime => &["shrink_time_budget", "grow_time_budget", "hold"],
        }
    }

    /// Corrective actions available for this flag.
    pub fn actions(self) -> Vec<Action> {
        crate::learning::actions(self.action_names())
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Limits above which a [`Flag`] is raised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Pending queue items.
    pub queue_backlog: usize,
    /// Fraction of failed items, compared against the worse of the processor
    /// and telemetry rates.
    pub error_rate: f64,
    /// Population variance of all Q-values.
    pub q_value_variance: f64,
    /// Seconds.
    pub response_time: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            queue_backlog: 100,
            error_rate: 0.05,
            q_value_variance: 10.0,
            response_time: 2.0,
        }
    }
}

impl Thresholds {
    /// Threshold configured for `flag`.
    pub fn limit(&self, flag: Flag) -> f64 {
        match flag {
            Flag::QueueBacklog => self.queue_backlog as f64,
            Flag::ErrorRate => self.error_rate,
            Flag::QValueVariance => self.q_value_variance,
            Flag::ResponseTime => self.response_time,
        }
    }

    /// Rejects negative or non-finite limits.
    pub fn is_valid(&self) -> bool {
        [self.error_rate, self.q_value_variance, self.response_time]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Everything the cycle measures, gathered in the Input and Observe phases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub queue_size: usize,
    pub processor_error_rate: f64,
    pub result_buffer_size: usize,
    pub policy: PolicySummary,
    pub epsilon: f64,
    pub learning_rate: f64,
    pub experiences: usize,
    pub telemetry: TelemetrySnapshot,
}

impl Snapshot {
    /// The worse of the processor's own error rate and the reported one.
    pub fn error_rate(&self) -> f64 {
        self.processor_error_rate.max(self.telemetry.error_rate)
    }

    /// The metric a flag is evaluated on; lower is better for all of them.
    pub fn measure(&self, flag: Flag) -> f64 {
        match flag {
            Flag::QueueBacklog => self.queue_size as f64,
            Flag::ErrorRate => self.error_rate(),
            Flag::QValueVariance => self.policy.value_variance,
            Flag::ResponseTime => self.telemetry.response_time,
        }
    }

    /// Discretized learning state for acting on `flag`.
    ///
    /// Each metric is bucketed by its ratio to the threshold so that similar
    /// situations share Q-table rows.
    pub fn state_for(&self, flag: Flag, thresholds: &Thresholds) -> State {
        let mut state = State::new().with("flag", flag.name());
        for f in Flag::ALL {
            state.insert(f.name(), level(self.measure(f), thresholds.limit(f)));
        }
        state
    }
}

fn level(value: f64, limit: f64) -> &'static str {
    if value <= limit {
        "normal"
    } else if limit > 0.0 && value <= limit * 2.0 {
        "elevated"
    } else {
        "critical"
    }
}

/// One flag's reading against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub flag: Flag,
    pub value: f64,
    pub threshold: f64,
    pub raised: bool,
}

/// Result of the Evaluate phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub readings: Vec<Reading>,
}

impl Evaluation {
    /// Raised flags, in evaluation order.
    pub fn flags(&self) -> impl Iterator<Item = Flag> + '_ {
        self.readings.iter().filter(|r| r.raised).map(|r| r.flag)
    }

    /// Whether any flag was raised.
    pub fn needs_optimization(&self) -> bool {
        self.readings.iter().any(|r| r.raised)
    }
}

/// Scores a snapshot against the thresholds.
pub fn evaluate(snapshot: &Snapshot, thresholds: &Thresholds) -> Evaluation {
    let readings = Flag::ALL
        .into_iter()
        .map(|flag| {
            let value = snapshot.measure(flag);
            let threshold = thresholds.limit(flag);
            Reading {
                flag,
                value,
                threshold,
                raised: value > threshold,
            }
        })
        .collect();
    Evaluation { readings }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Snapshot {
        Snapshot::default()
    }

    #[test]
    fn quiet_snapshot_raises_nothing() {
        let eval = evaluate(&quiet(), &Thresholds::default());
        assert!(!eval.needs_optimization());
        assert_eq!(eval.readings.len(), 4);
    }

    #[test]
    fn thresholds_are_strict() {
        let t = Thresholds::default();
        let mut snap = quiet();
        snap.queue_size = 100;
        assert_eq!(evaluate(&snap, &t).flags().count(), 0);
        snap.queue_size = 101;
        assert_eq!(evaluate(&snap, &t).flags().collect::<Vec<_>>(), vec![Flag::QueueBacklog]);
    }

    #[test]
    fn error_rate_uses_worse_source() {
        let t = Thresholds::default();
        let mut snap = quiet();
        snap.processor_error_rate = 0.01;
        snap.telemetry.error_rate = 0.2;
        assert_eq!(snap.measure(Flag::ErrorRate), 0.2);
        assert!(evaluate(&snap, &t).flags().any(|f| f == Flag::ErrorRate));
    }

    #[test]
    fn all_flags_raised_in_order() {
        let mut snap = quiet();
        snap.queue_size = 500;
        snap.processor_error_rate = 0.5;
        snap.policy.value_variance = 50.0;
        snap.telemetry.response_time = 9.0;
        let flags: Vec<Flag> = evaluate(&snap, &Thresholds::default()).flags().collect();
        assert_eq!(flags, Flag::ALL.to_vec());
    }

    #[test]
    fn state_buckets_metrics() {
        let t = Thresholds::default();
        let mut a = quiet();
        a.queue_size = 150;
        let mut b = quiet();
        b.queue_size = 180;
        // Both are "elevated" so they share a row.
        assert_eq!(
            a.state_for(Flag::QueueBacklog, &t).key(),
            b.state_for(Flag::QueueBacklog, &t).key()
        );
        b.queue_size = 1000;
        assert_ne!(
            a.state_for(Flag::QueueBacklog, &t).key(),
            b.state_for(Flag::QueueBacklog, &t).key()
        );
        assert_ne!(
            a.state_for(Flag::QueueBacklog, &t).key(),
            a.state_for(Flag::ErrorRate, &t).key()
        );
    }

    #[test]
    fn every_flag_has_actions() {
        for flag in Flag::ALL {
            assert!(!flag.actions().is_empty());
        }
    }
}
