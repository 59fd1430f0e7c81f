//! Observability infrastructure: tracing subscriber and operational counters.

use crate::error::{PulseError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize the global tracing subscriber and, when `metrics_address` is set, the
/// Prometheus exporter serving the counters on that address.
///
/// `RUST_LOG` takes precedence; otherwise events at `default_level` and above are kept.
/// Call once at startup, from within the Tokio runtime.
pub fn init(default_level: &str, metrics_address: Option<&str>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level)).map_err(
            |e| PulseError::InvalidConfig { reason: format!("Invalid log level: {}", e) },
        )?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()
        .map_err(|e| PulseError::Other(anyhow::anyhow!("Failed to install subscriber: {}", e)))?;

    if let Some(raw) = metrics_address {
        let addr = listen_address(raw)?;
        PrometheusBuilder::new().with_http_listener(addr).install().map_err(|e| {
            PulseError::Other(anyhow::anyhow!("Failed to install metrics exporter: {}", e))
        })?;
        tracing::info!(%addr, "Serving Prometheus metrics");
    }

    metrics::register_metrics();
    tracing::info!(level = default_level, "Observability initialized");
    Ok(())
}

/// Resolve a `host:port` listen address. An empty host (`:9100`) binds all interfaces.
pub fn listen_address(raw: &str) -> Result<SocketAddr> {
    let invalid = |reason: String| PulseError::InvalidConfig {
        reason: format!("Invalid metrics address {}: {}", raw, reason),
    };
    let qualified = match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => raw.to_string(),
    };
    qualified
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("no address resolved".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics as counters;
    use crate::types::MetricKind;

    #[test]
    fn test_listen_address() {
        assert_eq!(listen_address(":9100").unwrap(), SocketAddr::from(([0, 0, 0, 0], 9100)));
        assert_eq!(
            listen_address("127.0.0.1:9464").unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 9464))
        );
        assert!(listen_address("localhost:9100").unwrap().ip().is_loopback());
        assert!(matches!(listen_address("9100"), Err(PulseError::InvalidConfig { .. })));
        assert!(listen_address("127.0.0.1:port").is_err());
    }

    #[test]
    fn test_counters_reach_prometheus_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            counters::register_metrics();
            counters::record_sent("batch", 3);
            counters::record_update(MetricKind::Counter);
            counters::record_update(MetricKind::Counter);
        });

        let rendered = handle.render();
        assert!(rendered.contains("pulse_agent_sent_total{mode=\"batch\"} 3"), "{rendered}");
        assert!(rendered.contains("pulse_server_updates_total{type=\"counter\"} 2"), "{rendered}");
    }
}
