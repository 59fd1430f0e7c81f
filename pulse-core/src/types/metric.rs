//! Metric identity, values and the wire DTO.
//!
//! A metric is either a gauge (last write wins) or a counter (deltas accumulate).
//! The kind of a stored metric is fixed at creation; [`MetricRecord::apply`] refuses
//! values of the other kind.

use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Unique key of a metric within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricName(String);

impl MetricName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for MetricName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for MetricName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Metric type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            other => {
                Err(PulseError::InvalidMetric { reason: format!("unknown metric type {}", other) })
            }
        }
    }
}

/// Metric value; the variant carries the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a textual value according to `kind`.
    ///
    /// Gauges must be finite: `NaN` and the infinities have no JSON form.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self> {
        match kind {
            MetricKind::Gauge => {
                let value = raw.parse::<f64>().map_err(|e| PulseError::InvalidMetric {
                    reason: format!("bad gauge value {}: {}", raw, e),
                })?;
                finite_gauge(value).map(Self::Gauge)
            }
            MetricKind::Counter => raw.parse::<i64>().map(Self::Counter).map_err(|e| {
                PulseError::InvalidMetric { reason: format!("bad counter value {}: {}", raw, e) }
            }),
        }
    }
}

fn finite_gauge(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PulseError::InvalidMetric { reason: format!("gauge value {} is not finite", value) })
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge(v) => write!(f, "{}", v),
            Self::Counter(v) => write!(f, "{}", v),
        }
    }
}

/// A stored metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: MetricName,
    pub value: MetricValue,
}

impl MetricRecord {
    pub fn new(name: impl Into<MetricName>, value: MetricValue) -> Self {
        Self { name: name.into(), value }
    }

    pub fn gauge(name: impl Into<MetricName>, value: f64) -> Self {
        Self::new(name, MetricValue::Gauge(value))
    }

    pub fn counter(name: impl Into<MetricName>, delta: i64) -> Self {
        Self::new(name, MetricValue::Counter(delta))
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Apply an observation: counters add the delta, gauges take the new value.
    ///
    /// A delta that would leave the `i64` range is refused and the record is unchanged.
    pub fn apply(&mut self, incoming: MetricValue) -> Result<()> {
        match (&mut self.value, incoming) {
            (MetricValue::Counter(stored), MetricValue::Counter(delta)) => {
                *stored = stored
                    .checked_add(delta)
                    .ok_or_else(|| PulseError::CounterOverflow { name: self.name.to_string() })?;
                Ok(())
            }
            (MetricValue::Gauge(stored), MetricValue::Gauge(value)) => {
                *stored = value;
                Ok(())
            }
            (stored, incoming) => Err(PulseError::KindMismatch {
                name: self.name.to_string(),
                stored: stored.kind(),
                incoming: incoming.kind(),
            }),
        }
    }
}

/// Transfer object used on the wire and in snapshot files.
///
/// Exactly one of `delta` (counter) or `value` (gauge) is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metrics {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self { id: id.into(), mtype: MetricKind::Gauge, delta: None, value: Some(value) }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self { id: id.into(), mtype: MetricKind::Counter, delta: Some(delta), value: None }
    }

    /// A query DTO carrying only identity, as used by value lookups.
    pub fn query(id: impl Into<String>, mtype: MetricKind) -> Self {
        Self { id: id.into(), mtype, delta: None, value: None }
    }

    pub fn name(&self) -> MetricName {
        MetricName::new(self.id.clone())
    }

    /// The typed value carried by this DTO.
    pub fn metric_value(&self) -> Result<MetricValue> {
        match (self.mtype, self.delta, self.value) {
            (MetricKind::Counter, Some(delta), _) => Ok(MetricValue::Counter(delta)),
            (MetricKind::Gauge, _, Some(value)) => finite_gauge(value).map(MetricValue::Gauge),
            (kind, _, _) => Err(PulseError::InvalidMetric {
                reason: format!("{} {} carries no value", kind, self.id),
            }),
        }
    }

    /// Check the DTO is applicable: non-empty id and a value for its type.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PulseError::InvalidMetric { reason: "metric name is empty".to_string() });
        }
        self.metric_value().map(|_| ())
    }
}

impl From<&MetricRecord> for Metrics {
    fn from(record: &MetricRecord) -> Self {
        match record.value {
            MetricValue::Gauge(v) => Self::gauge(record.name.as_str(), v),
            MetricValue::Counter(d) => Self::counter(record.name.as_str(), d),
        }
    }
}

impl TryFrom<&Metrics> for MetricRecord {
    type Error = PulseError;

    fn try_from(dto: &Metrics) -> Result<Self> {
        dto.validate()?;
        Ok(Self::new(dto.name(), dto.metric_value()?))
    }
}
