//! Configuration for the agent and the server.
//!
//! Both structs are built once at startup: defaults, then an optional JSON file, then
//! flag and environment overrides applied by the binaries.

use crate::error::{PulseError, Result};
use crate::transport::TrustedSubnet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations are written as whole seconds in config files.
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| PulseError::InvalidConfig {
        reason: format!("Failed to read config {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&content).map_err(|e| PulseError::InvalidConfig {
        reason: format!("Failed to parse config {}: {}", path.display(), e),
    })
}

/// Empty strings from flags or env vars mean "not set".
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Server `host:port` or base URL.
    pub address: String,
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    #[serde(with = "seconds")]
    pub report_interval: Duration,
    /// Concurrent single-metric senders; 0 selects batch mode.
    pub rate_limit: usize,
    /// HMAC key for request signatures.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Server public key (PEM) for payload encryption.
    pub crypto_key: Option<PathBuf>,
    #[serde(with = "seconds")]
    pub request_timeout: Duration,
    pub log_level: String,
    /// Prometheus exporter listen address; unset disables the exporter.
    pub metrics_address: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 0,
            secret_key: None,
            crypto_key: None,
            request_timeout: Duration::from_secs(5),
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(PulseError::InvalidConfig { reason: "address is empty".to_string() });
        }
        if self.poll_interval.is_zero() || self.report_interval.is_zero() {
            return Err(PulseError::InvalidConfig {
                reason: "poll and report intervals must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL of the server, adding a scheme to bare `host:port` addresses.
    pub fn server_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    pub fn secret(&self) -> Option<&str> {
        non_empty(&self.secret_key)
    }

    pub fn metrics_address(&self) -> Option<&str> {
        non_empty(&self.metrics_address)
    }
}

/// Repository backend chosen from the server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Sql(String),
    Snapshot(PathBuf),
    Memory,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen `host:port`.
    pub address: String,
    /// Minimum time between snapshot backups; zero writes on every mutation.
    #[serde(with = "seconds")]
    pub store_interval: Duration,
    #[serde(alias = "store_file")]
    pub file_storage_path: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Server private key (PKCS#1 PEM) for payload decryption.
    pub crypto_key: Option<PathBuf>,
    /// CIDR of agents allowed to report; unset accepts every client.
    pub trusted_subnet: Option<String>,
    pub log_level: String,
    pub metrics_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval: Duration::from_secs(300),
            file_storage_path: None,
            restore: true,
            database_dsn: None,
            secret_key: None,
            crypto_key: None,
            trusted_subnet: None,
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// DSN wins over a snapshot file; neither means plain memory.
    pub fn backend(&self) -> BackendKind {
        if let Some(dsn) = non_empty(&self.database_dsn) {
            return BackendKind::Sql(dsn.to_string());
        }
        match &self.file_storage_path {
            Some(path) if !path.as_os_str().is_empty() => BackendKind::Snapshot(path.clone()),
            _ => BackendKind::Memory,
        }
    }

    pub fn secret(&self) -> Option<&str> {
        non_empty(&self.secret_key)
    }

    pub fn metrics_address(&self) -> Option<&str> {
        non_empty(&self.metrics_address)
    }

    /// Parsed trusted subnet, if one is configured.
    pub fn trusted_subnet(&self) -> Result<Option<TrustedSubnet>> {
        non_empty(&self.trusted_subnet).map(str::parse).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.rate_limit, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_load_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"address": "metrics.local:9090", "report_interval": 1}"#)
            .unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.address, "metrics.local:9090");
        assert_eq!(config.report_interval, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(PulseError::InvalidConfig { .. })));
        assert!(matches!(
            ServerConfig::load(&dir.path().join("missing.json")),
            Err(PulseError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_server_url() {
        let mut config = AgentConfig::default();
        assert_eq!(config.server_url(), "http://localhost:8080");
        config.address = "https://metrics.example.com/".to_string();
        assert_eq!(config.server_url(), "https://metrics.example.com");
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = AgentConfig { poll_interval: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_selection() {
        let mut config = ServerConfig::default();
        assert_eq!(config.backend(), BackendKind::Memory);

        config.file_storage_path = Some(PathBuf::from("/tmp/metrics.json"));
        assert_eq!(config.backend(), BackendKind::Snapshot(PathBuf::from("/tmp/metrics.json")));

        config.database_dsn = Some(String::new());
        assert_eq!(config.backend(), BackendKind::Snapshot(PathBuf::from("/tmp/metrics.json")));

        config.database_dsn = Some("sqlite::memory:".to_string());
        assert_eq!(config.backend(), BackendKind::Sql("sqlite::memory:".to_string()));
    }

    #[test]
    fn test_trusted_subnet_setting() {
        let mut config = ServerConfig::default();
        assert_eq!(config.trusted_subnet().unwrap(), None);

        config.trusted_subnet = Some(String::new());
        assert_eq!(config.trusted_subnet().unwrap(), None);

        config.trusted_subnet = Some("10.0.0.0/8".to_string());
        let subnet = config.trusted_subnet().unwrap().unwrap();
        assert!(subnet.contains("10.20.30.40".parse().unwrap()));

        config.trusted_subnet = Some("10.0.0.0/99".to_string());
        assert!(matches!(config.trusted_subnet(), Err(PulseError::InvalidConfig { .. })));
    }

    #[test]
    fn test_metrics_address_from_file() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"metrics_address": ":9100", "trusted_subnet": "10.0.0.0/8"}"#)
                .unwrap();
        assert_eq!(config.metrics_address(), Some(":9100"));
        assert!(config.trusted_subnet().unwrap().is_some());

        let agent = AgentConfig { metrics_address: Some(String::new()), ..Default::default() };
        assert_eq!(agent.metrics_address(), None);
    }

    #[test]
    fn test_server_file_alias() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"store_file": "/var/lib/pulse.json", "store_interval": 0}"#)
                .unwrap();
        assert_eq!(config.file_storage_path, Some(PathBuf::from("/var/lib/pulse.json")));
        assert!(config.store_interval.is_zero());
        assert!(config.restore);
    }
}
