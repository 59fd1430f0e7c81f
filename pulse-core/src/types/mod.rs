//! Core domain types for pulse.

pub mod metric;

// Re-exports
pub use metric::{MetricKind, MetricName, MetricRecord, MetricValue, Metrics};
