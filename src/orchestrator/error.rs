use thiserror::Error;

use super::evaluate::Flag;
use super::telemetry::TelemetryError;
use crate::learning::LearningError;
use crate::persistence::PersistenceError;

/// Reason a cycle was abandoned.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Input phase failed: {0}")]
    Input(#[source] TelemetryError),

    #[error("Act phase failed on flag {flag}: {source}")]
    Act {
        flag: Flag,
        #[source]
        source: LearningError,
    },

    #[error("Observe phase failed: {0}")]
    Observe(#[source] TelemetryError),

    #[error("Failed to persist {key}: {source}")]
    Persist {
        key: &'static str,
        #[source]
        source: PersistenceError,
    },
}
