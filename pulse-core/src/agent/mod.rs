//! Agent pipeline: collect, aggregate, transmit.
//!
//! ```text
//! RuntimeSource ─┐
//! HostMemory ────┼─ queues ─> aggregate ─> MemoryRepository ─> Transmitter ─> server
//! HostCpu ───────┘
//! ```
//!
//! All stages observe one [`CancellationToken`]. On cancellation the collectors close
//! their queues, the aggregator drains what is buffered and the transmitter stops after
//! in-flight deliveries.

pub mod aggregate;
pub mod collect;
pub mod send;

use crate::config::AgentConfig;
use crate::error::{PulseError, Result};
use crate::storage::MemoryRepository;
use crate::transport::{HttpClient, MetricsClient, RetrySchedule};
use collect::{spawn_collector, HostCpuSource, HostMemorySource, RuntimeSource};
use send::Transmitter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Agent {
    config: AgentConfig,
    repo: MemoryRepository,
    client: Arc<dyn MetricsClient>,
    retry: RetrySchedule,
}

impl Agent {
    /// Build an agent that reports over HTTP.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = Arc::new(HttpClient::new(&config)?);
        Self::with_client(config, client)
    }

    /// Build an agent with a custom transport.
    pub fn with_client(config: AgentConfig, client: Arc<dyn MetricsClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, repo: MemoryRepository::new(), client, retry: RetrySchedule::default() })
    }

    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    /// Local repository the pipeline aggregates into.
    pub fn repository(&self) -> &MemoryRepository {
        &self.repo
    }

    /// Run every stage until `token` is cancelled and the pipeline has drained.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let poll = self.config.poll_interval;
        info!(
            server = %self.config.server_url(),
            poll_interval = ?poll,
            report_interval = ?self.config.report_interval,
            rate_limit = self.config.rate_limit,
            "Agent starting"
        );

        let queues = vec![
            spawn_collector(RuntimeSource::new(), poll, true, token.clone()),
            spawn_collector(HostMemorySource::new(), poll, false, token.clone()),
            spawn_collector(HostCpuSource::new(), poll, false, token.clone()),
        ];
        let repo = self.repo.clone();
        let aggregator = tokio::spawn(async move { aggregate::aggregate(&repo, queues).await });

        let transmitter = Transmitter {
            repo: self.repo.clone(),
            client: self.client.clone(),
            retry: self.retry.clone(),
            report_interval: self.config.report_interval,
        };
        let sender = match self.config.rate_limit {
            0 => tokio::spawn(transmitter.run_batch(token.clone())),
            workers => tokio::spawn(transmitter.run_pool(workers, token.clone())),
        };

        let applied = aggregator
            .await
            .map_err(|e| PulseError::Other(anyhow::anyhow!("Aggregator task failed: {}", e)))?;
        sender
            .await
            .map_err(|e| PulseError::Other(anyhow::anyhow!("Sender task failed: {}", e)))?;

        info!(applied, "Agent stopped");
        Ok(())
    }
}
