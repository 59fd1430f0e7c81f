use anyhow::Result;
use clap::Parser;
use pulse_core::shutdown::wait_for_signal;
use pulse_core::transport::encrypt::Decryptor;
use pulse_core::{init_observability, storage, ServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

mod routes;

#[derive(Parser)]
#[command(name = "pulse-server")]
#[command(about = "Accepts metric updates and accumulates them", long_about = None)]
struct Cli {
    /// Address to listen on (host:port)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between snapshot backups, 0 writes on every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file path
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Restore metrics from the snapshot file on start
    #[arg(short, long, env = "RESTORE")]
    restore: Option<bool>,

    /// Database DSN (SQLite URL); selects the SQL backend
    #[arg(short, long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Secret key for request signature checks
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// Path to the RSA private key (PKCS#1 PEM)
    #[arg(long, env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Only accept agents whose X-Real-IP lies in this CIDR
    #[arg(short, long, env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// Serve Prometheus metrics on this address (host:port)
    #[arg(long, env = "METRICS_ADDRESS")]
    metrics_address: Option<String>,

    /// Path to a JSON config file
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Flags and env vars override the config file, which overrides defaults.
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(secs) = self.store_interval {
            config.store_interval = Duration::from_secs(secs);
        }
        if let Some(path) = self.file_storage_path {
            config.file_storage_path = Some(path);
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if let Some(dsn) = self.database_dsn {
            config.database_dsn = Some(dsn);
        }
        if let Some(key) = self.key {
            config.secret_key = Some(key);
        }
        if let Some(path) = self.crypto_key {
            config.crypto_key = Some(path);
        }
        if let Some(subnet) = self.trusted_subnet {
            config.trusted_subnet = Some(subnet);
        }
        if let Some(address) = self.metrics_address {
            config.metrics_address = Some(address);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;
    init_observability(&config.log_level, config.metrics_address())?;

    info!(backend = ?config.backend(), "pulse server starting");
    let trusted_subnet = config.trusted_subnet()?;
    if let Some(subnet) = &trusted_subnet {
        info!(%subnet, "Accepting agents from trusted subnet only");
    }
    let decryptor = config.crypto_key.as_deref().map(Decryptor::from_pem_file).transpose()?;
    let repo = storage::open(&config).await?;
    let state = routes::AppState::new(repo.clone(), config.secret().map(str::to_string), decryptor)
        .with_trusted_subnet(trusted_subnet);

    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    info!(address = %config.address, "pulse server listening");
    axum::serve(listener, routes::router(state)).with_graceful_shutdown(wait_for_signal()).await?;

    info!("pulse server shutting down");
    repo.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        let file = r#"{"address": "0.0.0.0:9000", "store_interval": 60, "restore": false}"#;
        std::fs::write(&path, file).unwrap();

        let cli = Cli::parse_from([
            "pulse-server",
            "--config",
            path.to_str().unwrap(),
            "-i",
            "0",
            "-d",
            "sqlite::memory:",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.address, "0.0.0.0:9000");
        assert!(config.store_interval.is_zero());
        assert!(!config.restore);
        assert_eq!(config.database_dsn.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.trusted_subnet, None);
    }

    #[test]
    fn test_trusted_subnet_and_metrics_flags() {
        let cli = Cli::parse_from([
            "pulse-server",
            "-t",
            "10.0.0.0/8",
            "--metrics-address",
            ":9100",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.metrics_address(), Some(":9100"));
        let subnet = config.trusted_subnet().unwrap().unwrap();
        assert!(subnet.contains("10.1.1.1".parse().unwrap()));

        let cli = Cli::parse_from(["pulse-server", "--trusted-subnet", "10.0.0.0/40"]);
        assert!(cli.into_config().unwrap().trusted_subnet().is_err());
    }
}
