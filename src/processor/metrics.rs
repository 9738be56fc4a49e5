//! Processor counters and status reports.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Id;

/// Cumulative processor counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    /// Items dispatched successfully, across all batches.
    pub processed_items: u64,
    /// Items dropped because of a missing handler or a handler failure.
    pub errors: u64,
    pub queue_size: usize,
    /// Entries currently held in the results buffer.
    pub buffer_size: usize,
    /// When the last batch finished; `None` before the first batch.
    pub last_processed: Option<DateTime<Utc>>,
    /// Wall time spent in the last batch.
    pub last_batch_duration: Duration,
}

impl ProcessorMetrics {
    /// Fraction of attempted items that failed, in `[0, 1]`.
    pub fn error_rate(&self) -> f64 {
        let attempted = self.processed_items + self.errors;
        if attempted == 0 {
            0.0
        } else {
            self.errors as f64 / attempted as f64
        }
    }
}

impl fmt::Display for ProcessorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Processor Metrics ===")?;
        writeln!(f, "  Processed items:   {}", self.processed_items)?;
        writeln!(
            f,
            "  Errors:            {} ({:.1}%)",
            self.errors,
            self.error_rate() * 100.0
        )?;
        writeln!(f, "  Queue size:        {}", self.queue_size)?;
        writeln!(f, "  Buffer size:       {}", self.buffer_size)?;
        match self.last_processed {
            Some(at) => writeln!(f, "  Last processed:    {}", at.to_rfc3339())?,
            None => writeln!(f, "  Last processed:    never")?,
        }
        write!(
            f,
            "  Last batch:        {:.3} ms",
            self.last_batch_duration.as_secs_f64() * 1000.0
        )
    }
}

/// A successfully handled task, kept in the bounded results buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResult {
    pub task_id: Id,
    pub task_type: String,
    pub result: Value,
    /// Time from enqueue to completion.
    pub latency: Duration,
    pub completed_at: DateTime<Utc>,
}

/// Point-in-time view of the queue and the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub buffer_size: usize,
    /// Pending items per task type.
    pub by_type: BTreeMap<String, usize>,
    pub metrics: ProcessorMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_handles_zero_attempts() {
        assert_eq!(ProcessorMetrics::default().error_rate(), 0.0);
    }

    #[test]
    fn error_rate_ratio() {
        let m = ProcessorMetrics {
            processed_items: 3,
            errors: 1,
            ..ProcessorMetrics::default()
        };
        assert!((m.error_rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn display_mentions_counts() {
        let m = ProcessorMetrics {
            processed_items: 7,
            ..ProcessorMetrics::default()
        };
        let text = m.to_string();
        assert!(text.contains("Processed items:   7"));
        assert!(text.contains("never"));
    }
}
