//! Externally supplied runtime telemetry.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Telemetry unavailable: {0}")]
    Unavailable(String),
}

/// Host metrics read during the Input and Observe phases.
///
/// Every field is an untrusted float. [`TelemetrySnapshot::from_fields`]
/// replaces missing or non-finite values with `0.0`; snapshots built
/// directly are cleaned the same way by [`TelemetrySnapshot::sanitized`]
/// before the cycle reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// Seconds.
    pub response_time: f64,
    /// Fraction in `[0, 1]`.
    pub error_rate: f64,
    pub user_activity: f64,
    /// Any other numeric fields the provider reported.
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

impl TelemetrySnapshot {
    const KNOWN: [&'static str; 5] = [
        "cpu_usage",
        "memory_usage",
        "response_time",
        "error_rate",
        "user_activity",
    ];

    /// Builds a snapshot from a JSON object, sanitizing every value.
    ///
    /// Non-object input yields the all-zero snapshot. Unknown numeric fields
    /// are kept in `extra`; unknown non-numeric fields are dropped.
    pub fn from_fields(fields: &Value) -> Self {
        let read = |name: &str| sanitize(fields.get(name));
        let extra = fields
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, _)| !Self::KNOWN.contains(&k.as_str()))
                    .filter_map(|(k, v)| {
                        v.as_f64()
                            .filter(|x| x.is_finite())
                            .map(|x| (k.clone(), x))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            cpu_usage: read("cpu_usage"),
            memory_usage: read("memory_usage"),
            response_time: read("response_time"),
            error_rate: read("error_rate"),
            user_activity: read("user_activity"),
            extra,
        }
    }

    /// Replaces non-finite known fields with `0.0` and drops non-finite extras.
    pub fn sanitized(mut self) -> Self {
        for x in [
            &mut self.cpu_usage,
            &mut self.memory_usage,
            &mut self.response_time,
            &mut self.error_rate,
            &mut self.user_activity,
        ] {
            *x = finite_or_zero(*x);
        }
        self.extra.retain(|_, x| x.is_finite());
        self
    }
}

fn sanitize(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).map_or(0.0, finite_or_zero)
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Source of [`TelemetrySnapshot`]s.
pub trait TelemetryProvider: Send + Sync {
    fn snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError>;
}

/// Provider returning whatever snapshot was last set.
///
/// Starts available with the all-zero snapshot unless built with
/// [`StaticTelemetry::unavailable`].
#[derive(Debug)]
pub struct StaticTelemetry {
    current: RwLock<Option<TelemetrySnapshot>>,
}

impl Default for StaticTelemetry {
    fn default() -> Self {
        Self::new(TelemetrySnapshot::default())
    }
}

impl StaticTelemetry {
    /// A provider that always returns `snapshot`.
    pub fn new(snapshot: TelemetrySnapshot) -> Self {
        Self {
            current: RwLock::new(Some(snapshot)),
        }
    }

    /// A provider that fails until [`StaticTelemetry::set`] is called.
    pub fn unavailable() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Replaces the snapshot returned from now on.
    pub fn set(&self, snapshot: TelemetrySnapshot) {
        *self.current.write() = Some(snapshot);
    }

    /// Makes every following read fail.
    pub fn set_unavailable(&self) {
        *self.current.write() = None;
    }
}

impl TelemetryProvider for StaticTelemetry {
    fn snapshot(&self) -> Result<TelemetrySnapshot, TelemetryError> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| TelemetryError::Unavailable("no snapshot set".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_fields_sanitizes() {
        let snap = TelemetrySnapshot::from_fields(&json!({
            "cpu_usage": 0.5,
            "response_time": "slow",
            "error_rate": null,
            "queue_depth": 12,
            "label": "x",
        }));
        assert_eq!(snap.cpu_usage, 0.5);
        assert_eq!(snap.response_time, 0.0);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.memory_usage, 0.0);
        assert_eq!(snap.extra.get("queue_depth"), Some(&12.0));
        assert!(!snap.extra.contains_key("label"));
    }

    #[test]
    fn sanitized_clears_non_finite_values() {
        let mut extra = BTreeMap::new();
        extra.insert("load".to_owned(), 2.0);
        extra.insert("bogus".to_owned(), f64::NEG_INFINITY);
        let snap = TelemetrySnapshot {
            cpu_usage: f64::NAN,
            response_time: f64::INFINITY,
            error_rate: 0.25,
            extra,
            ..TelemetrySnapshot::default()
        }
        .sanitized();
        assert_eq!(snap.cpu_usage, 0.0);
        assert_eq!(snap.response_time, 0.0);
        assert_eq!(snap.error_rate, 0.25);
        assert_eq!(snap.extra.len(), 1);
        assert_eq!(snap.extra.get("load"), Some(&2.0));
    }

    #[test]
    fn non_object_is_all_zero() {
        assert_eq!(
            TelemetrySnapshot::from_fields(&json!([1, 2])),
            TelemetrySnapshot::default()
        );
    }

    #[test]
    fn static_provider_toggles_availability() {
        let provider = StaticTelemetry::unavailable();
        assert!(matches!(
            provider.snapshot(),
            Err(TelemetryError::Unavailable(_))
        ));
        provider.set(TelemetrySnapshot {
            response_time: 3.0,
            ..TelemetrySnapshot::default()
        });
        assert_eq!(provider.snapshot().unwrap().response_time, 3.0);
        provider.set_unavailable();
        assert!(provider.snapshot().is_err());
    }
}
