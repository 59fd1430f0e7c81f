use anyhow::Result;
use clap::Parser;
use pulse_core::shutdown::cancel_on_signal;
use pulse_core::{init_observability, Agent, AgentConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "pulse-agent")]
#[command(about = "Samples runtime and host metrics for a pulse server", long_about = None)]
struct Cli {
    /// Server address (host:port or URL)
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Seconds between samples
    #[arg(short, long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(short, long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Concurrent senders, 0 sends one batch per report
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// Secret key for request signatures
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// Path to the server's RSA public key (PEM)
    #[arg(long, env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

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
    fn into_config(self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::default(),
        };
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.report_interval {
            config.report_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit = limit;
        }
        if let Some(key) = self.key {
            config.secret_key = Some(key);
        }
        if let Some(path) = self.crypto_key {
            config.crypto_key = Some(path);
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

    let agent = Agent::new(config)?;
    let token = CancellationToken::new();
    cancel_on_signal(token.clone());

    agent.run(token).await?;
    info!("pulse agent exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"address": "metrics:9000", "poll_interval": 5}"#).unwrap();

        let cli = Cli::parse_from([
            "pulse-agent",
            "-c",
            path.to_str().unwrap(),
            "-p",
            "1",
            "-l",
            "3",
            "-k",
            "secret",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.address, "metrics:9000");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.rate_limit, 3);
        assert_eq!(config.secret(), Some("secret"));
        assert_eq!(config.metrics_address(), None);

        let cli = Cli::parse_from(["pulse-agent", "--metrics-address", "127.0.0.1:9464"]);
        assert_eq!(cli.into_config().unwrap().metrics_address(), Some("127.0.0.1:9464"));
    }
}
