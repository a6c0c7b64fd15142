//! Metric model shared by the agent, the aggregation service and every backend
//!
//! A [`MetricRecord`] is the wire shape exchanged over HTTP and written by
//! the agent. It is deliberately loose (`type` is a plain string, both
//! payload fields are optional) so that malformed input can be reported with
//! a precise [`ValidationError`] instead of a generic decode failure.
//!
//! [`validate`] turns a record into a [`MetricUpdate`], which carries exactly
//! one payload determined by its kind. Storage only ever sees updates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two metric kinds understood by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Running sum of all deltas ever applied
    Counter,

    /// Most recently applied value
    Gauge,
}

impl MetricKind {
    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format and the `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(ValidationError::InvalidKind(other.to_string())),
        }
    }
}

/// Reasons a record is rejected before it reaches storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("metric id is required")]
    EmptyId,

    #[error("metric type must be counter or gauge, got {0:?}")]
    InvalidKind(String),

    #[error("counter {0:?} requires a delta")]
    MissingDelta(String),

    #[error("gauge {0:?} requires a value")]
    MissingValue(String),

    #[error("metric {0:?} carries both delta and value")]
    ConflictingPayload(String),

    #[error("gauge {0:?} must be a finite number")]
    NonFiniteValue(String),
}

/// Metric record as exchanged over the wire
///
/// ```json
/// {"id": "PollCount", "type": "counter", "delta": 5}
/// {"id": "Alloc", "type": "gauge", "value": 1024.5}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter.as_str().to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge.as_str().to_string(),
            delta: None,
            value: Some(value),
        }
    }

    /// Render the payload the way plain-text endpoints show it
    ///
    /// Counters print as integers, gauges with the shortest representation
    /// that round-trips (`37.1`, `3`, `0.25`).
    pub fn display_value(&self) -> String {
        match (self.delta, self.value) {
            (Some(delta), _) => delta.to_string(),
            (None, Some(value)) => value.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// A validated update with exactly one payload
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Counter { id: String, delta: i64 },
    Gauge { id: String, value: f64 },
}

impl MetricUpdate {
    pub fn id(&self) -> &str {
        match self {
            MetricUpdate::Counter { id, .. } | MetricUpdate::Gauge { id, .. } => id,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricUpdate::Counter { .. } => MetricKind::Counter,
            MetricUpdate::Gauge { .. } => MetricKind::Gauge,
        }
    }
}

impl From<MetricUpdate> for MetricRecord {
    fn from(update: MetricUpdate) -> Self {
        match update {
            MetricUpdate::Counter { id, delta } => MetricRecord::counter(id, delta),
            MetricUpdate::Gauge { id, value } => MetricRecord::gauge(id, value),
        }
    }
}

/// Check a record and turn it into a typed update
///
/// An empty or whitespace-only id is rejected first, regardless of kind.
pub fn validate(record: &MetricRecord) -> Result<MetricUpdate, ValidationError> {
    if record.id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }

    let kind: MetricKind = record.kind.parse()?;

    match (kind, record.delta, record.value) {
        (_, Some(_), Some(_)) => Err(ValidationError::ConflictingPayload(record.id.clone())),
        (MetricKind::Counter, Some(delta), None) => Ok(MetricUpdate::Counter {
            id: record.id.clone(),
            delta,
        }),
        (MetricKind::Counter, None, _) => Err(ValidationError::MissingDelta(record.id.clone())),
        (MetricKind::Gauge, None, Some(value)) if !value.is_finite() => {
            Err(ValidationError::NonFiniteValue(record.id.clone()))
        }
        (MetricKind::Gauge, None, Some(value)) => Ok(MetricUpdate::Gauge {
            id: record.id.clone(),
            value,
        }),
        (MetricKind::Gauge, _, None) => Err(ValidationError::MissingValue(record.id.clone())),
    }
}
