//! Counter definitions.
//!
//! Counters are emitted through the `metrics` facade. Without an installed recorder they
//! are no-ops.

use crate::types::MetricKind;
use metrics::{counter, describe_counter};

/// Register all counters with descriptions.
pub fn register_metrics() {
    // Agent
    describe_counter!("pulse_agent_sent_total", "Metrics delivered to the server (by mode)");
    describe_counter!(
        "pulse_agent_send_failures_total",
        "Deliveries that failed after exhausting retries (by mode)"
    );

    // Storage
    describe_counter!("pulse_storage_backups_total", "Snapshot files written");
    describe_counter!("pulse_db_errors_total", "Failed database operations (by operation)");

    // Server
    describe_counter!("pulse_server_updates_total", "Metric updates applied (by type)");
}

pub fn record_sent(mode: &'static str, count: usize) {
    counter!("pulse_agent_sent_total", "mode" => mode).increment(count as u64);
}

pub fn record_send_failure(mode: &'static str) {
    counter!("pulse_agent_send_failures_total", "mode" => mode).increment(1);
}

pub fn record_update(kind: MetricKind) {
    counter!("pulse_server_updates_total", "type" => kind.as_str()).increment(1);
}
