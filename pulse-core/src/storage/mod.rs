//! Metric repositories.
//!
//! Three interchangeable backends implement [`Repository`]:
//! - [`MemoryRepository`]: mutex-guarded map, used by the agent and as the server default
//! - [`SnapshotRepository`]: memory plus a JSON snapshot file, restored on startup
//! - [`SqlRepository`]: SQLite table with atomic batch application
//!
//! The backend is chosen once at startup by [`open`] and never switched afterwards.

use crate::config::{BackendKind, ServerConfig};
use crate::error::Result;
use crate::types::{MetricName, MetricRecord, MetricValue, Metrics};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

mod memory;
pub mod migrations;
mod snapshot;
mod sql;


pub use memory::MemoryRepository;
pub use snapshot::SnapshotRepository;
pub use sql::SqlRepository;

/// Storage capability shared by every backend.
///
/// The insert/update choice belongs to the caller: `get` first, then `insert` when the
/// metric is absent or `update` with the fetched record. [`Repository::upsert`] does
/// exactly that for a single DTO.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch a metric. Absence is `Ok(None)`, never an error.
    async fn get(&self, name: &MetricName) -> Result<Option<MetricRecord>>;

    /// Create a metric, keyed by `record.name`.
    async fn insert(&self, record: MetricRecord) -> Result<()>;

    /// Apply `value` to a metric previously returned by `get`.
    ///
    /// Counters add, gauges overwrite. Fails with `MetricNotFound` when the metric is
    /// not stored and with `KindMismatch` when `value` has the other kind.
    async fn update(&self, existing: &MetricRecord, value: MetricValue) -> Result<()>;

    /// Snapshot of every stored metric. No ordering guarantee.
    async fn get_all(&self) -> Result<HashMap<MetricName, MetricRecord>>;

    /// Apply a list of DTOs in order with get-then-insert-or-update semantics.
    async fn batch_update(&self, metrics: &[Metrics]) -> Result<()>;

    /// Release resources. Durable backends flush first.
    async fn close(&self) -> Result<()>;

    /// Check the backing store is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Apply one DTO with get-then-insert-or-update semantics.
    async fn upsert(&self, metric: &Metrics) -> Result<()> {
        let record = MetricRecord::try_from(metric)?;
        match self.get(&record.name).await? {
            Some(existing) => self.update(&existing, record.value).await,
            None => self.insert(record).await,
        }
    }
}

/// Construct the repository selected by the server configuration.
pub async fn open(config: &ServerConfig) -> Result<Arc<dyn Repository>> {
    let repo: Arc<dyn Repository> = match config.backend() {
        BackendKind::Sql(dsn) => {
            info!("Using SQL repository");
            Arc::new(SqlRepository::connect(&dsn).await?)
        }
        BackendKind::Snapshot(path) => {
            info!(path = %path.display(), "Using snapshot repository");
            let repo =
                SnapshotRepository::new(Some(path), config.store_interval, config.restore).await?;
            Arc::new(repo)
        }
        BackendKind::Memory => {
            info!("Using in-memory repository");
            Arc::new(MemoryRepository::new())
        }
    };
    Ok(repo)
}
