//! Transmission stage.
//!
//! Batch mode posts the whole repository snapshot on every report tick. Worker-pool
//! mode enqueues one event per metric and lets N senders deliver them individually.
//! Every delivery runs under the retry schedule.

use crate::error::{PulseError, Result};
use crate::observability::metrics::{record_send_failure, record_sent};
use crate::storage::{MemoryRepository, Repository};
use crate::transport::{MetricsClient, RetrySchedule};
use crate::types::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::collect::QUEUE_CAPACITY;

/// Everything a transmission mode needs.
#[derive(Clone)]
pub struct Transmitter {
    pub repo: MemoryRepository,
    pub client: Arc<dyn MetricsClient>,
    pub retry: RetrySchedule,
    pub report_interval: Duration,
}

async fn snapshot(repo: &MemoryRepository) -> Result<Vec<Metrics>> {
    Ok(repo.get_all().await?.values().map(Metrics::from).collect())
}

impl Transmitter {
    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = interval_at(Instant::now() + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Post the full snapshot once. Empty repositories are not sent.
    pub async fn send_batch(&self, token: &CancellationToken) -> Result<usize> {
        let metrics = snapshot(&self.repo).await?;
        if metrics.is_empty() {
            return Ok(0);
        }
        let client = &self.client;
        let batch = metrics.as_slice();
        self.retry.run(token, || client.send_batch(batch)).await?;
        Ok(metrics.len())
    }

    /// Batch mode: one request per report tick until cancelled.
    pub async fn run_batch(self, token: CancellationToken) {
        let mut ticker = self.ticker();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.send_batch(&token).await {
                Ok(sent) => {
                    record_sent("batch", sent);
                    debug!(sent, "Batch delivered");
                }
                Err(PulseError::Cancelled) => break,
                Err(e) => {
                    record_send_failure("batch");
                    error!(error = %e, "Batch delivery failed");
                }
            }
        }
        info!("Batch sender stopped");
    }

    /// Worker-pool mode: `workers` senders share one bounded queue.
    ///
    /// Returns once cancelled and every worker has drained the queue.
    pub async fn run_pool(self, workers: usize, token: CancellationToken) {
        let (tx, rx) = mpsc::channel::<Metrics>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let handles: Vec<JoinHandle<()>> = (1..=workers)
            .map(|id| tokio::spawn(self.clone().worker(id, rx.clone(), token.clone())))
            .collect();
        info!(workers, "Sender pool started");

        let mut ticker = self.ticker();
        'report: loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let metrics = match snapshot(&self.repo).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    error!(error = %e, "Failed to read local metrics");
                    continue;
                }
            };
            for metric in metrics {
                tokio::select! {
                    _ = token.cancelled() => break 'report,
                    sent = tx.send(metric) => {
                        if sent.is_err() {
                            break 'report;
                        }
                    }
                }
            }
        }

        drop(tx);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Sender worker panicked");
            }
        }
        info!("Sender pool stopped");
    }

    async fn worker(
        self,
        id: usize,
        queue: Arc<Mutex<mpsc::Receiver<Metrics>>>,
        token: CancellationToken,
    ) {
        loop {
            let next = queue.lock().await.recv().await;
            let Some(metric) = next else {
                break;
            };
            let client = &self.client;
            match self.retry.run(&token, || client.send_metric(&metric)).await {
                Ok(()) => record_sent("pool", 1),
                Err(PulseError::Cancelled) => continue,
                Err(e) => {
                    record_send_failure("pool");
                    error!(worker = id, metric = %metric.id, error = %e, "Delivery failed");
                }
            }
        }
        debug!(worker = id, "Sender worker stopped");
    }
}
