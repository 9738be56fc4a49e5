//! Top-level configuration.
//!
//! Defaults reproduce the constants of the production deployment. A config
//! can be read from JSON, then overridden through `ADAPTLOOP_*` environment
//! variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `ADAPTLOOP_LEARNING_RATE` | `learning.learning_rate` |
//! | `ADAPTLOOP_DISCOUNT_FACTOR` | `learning.discount_factor` |
//! | `ADAPTLOOP_EPSILON` | `learning.epsilon` |
//! | `ADAPTLOOP_BUFFER_CAPACITY` | `buffer_capacity` |
//! | `ADAPTLOOP_BATCH_SIZE` | `processor.max_items_per_tick` |
//! | `ADAPTLOOP_TIME_BUDGET_MS` | `processor.time_budget_ms` |
//! | `ADAPTLOOP_PROCESSING_INTERVAL_SECS` | `scheduler.processing_interval_secs` |
//! | `ADAPTLOOP_CYCLE_INTERVAL_SECS` | `scheduler.cycle_interval_secs` |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::learning::buffer::DEFAULT_CAPACITY;
use crate::learning::LearningParams;
use crate::orchestrator::OrchestratorConfig;
use crate::processor::ProcessorConfig;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub learning: LearningParams,
    /// Experience replay capacity.
    pub buffer_capacity: usize,
    pub processor: ProcessorConfig,
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            learning: LearningParams::default(),
            buffer_capacity: DEFAULT_CAPACITY,
            processor: ProcessorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON config; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `ADAPTLOOP_*` environment overrides, then re-validates.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// All or nothing: on error `self` is left as it was.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut next = self.clone();
        override_with(&lookup, "ADAPTLOOP_LEARNING_RATE", &mut next.learning.learning_rate)?;
        override_with(&lookup, "ADAPTLOOP_DISCOUNT_FACTOR", &mut next.learning.discount_factor)?;
        override_with(&lookup, "ADAPTLOOP_EPSILON", &mut next.learning.epsilon)?;
        override_with(&lookup, "ADAPTLOOP_BUFFER_CAPACITY", &mut next.buffer_capacity)?;
        override_with(&lookup, "ADAPTLOOP_BATCH_SIZE", &mut next.processor.max_items_per_tick)?;
        override_with(&lookup, "ADAPTLOOP_TIME_BUDGET_MS", &mut next.processor.time_budget_ms)?;
        override_with(
            &lookup,
            "ADAPTLOOP_PROCESSING_INTERVAL_SECS",
            &mut next.scheduler.processing_interval_secs,
        )?;
        override_with(
            &lookup,
            "ADAPTLOOP_CYCLE_INTERVAL_SECS",
            &mut next.scheduler.cycle_interval_secs,
        )?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Checks cross-field and range constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.learning
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity must be at least 1"));
        }
        if self.processor.max_items_per_tick == 0 {
            return Err(invalid("processor.max_items_per_tick must be at least 1"));
        }
        if self.processor.result_capacity == 0 {
            return Err(invalid("processor.result_capacity must be at least 1"));
        }
        let weights = &self.processor.weights;
        if let Some((name, w)) = weights
            .weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w <= 0.0)
        {
            return Err(invalid(format!("weight for {name} must be positive, got {w}")));
        }
        if !weights.default_weight.is_finite() || weights.default_weight <= 0.0 {
            return Err(invalid("processor.weights.default_weight must be positive"));
        }

        let orch = &self.orchestrator;
        if !orch.thresholds.is_valid() {
            return Err(invalid("thresholds must be finite and non-negative"));
        }
        if orch.history_capacity == 0 {
            return Err(invalid("orchestrator.history_capacity must be at least 1"));
        }
        if !orch.failure_penalty.is_finite() || orch.failure_penalty < 0.0 {
            return Err(invalid("orchestrator.failure_penalty must be non-negative"));
        }
        let (lo, hi) = orch.learning_rate_bounds;
        if !(lo > 0.0 && lo <= hi && hi <= 1.0) {
            return Err(invalid(format!(
                "orchestrator.learning_rate_bounds must satisfy 0 < min <= max <= 1, got ({lo}, {hi})"
            )));
        }

        if self.scheduler.processing_interval_secs == 0 || self.scheduler.cycle_interval_secs == 0 {
            return Err(invalid("scheduler intervals must be at least 1 second"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}

fn override_with<T, F>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| invalid(format!("{name}: cannot parse {raw:?}")))?;
    }
    Ok(())
}
