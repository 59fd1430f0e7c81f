//! In-memory repository.

use super::Repository;
use crate::error::{PulseError, Result};
use crate::types::{MetricName, MetricRecord, MetricValue, Metrics};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Concurrency-safe metric map behind one coarse lock.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    values: Arc<Mutex<HashMap<MetricName, MetricRecord>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.values.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.lock().await.is_empty()
    }

    /// Insert or apply one DTO while holding the lock once.
    async fn apply_one(&self, metric: &Metrics) -> Result<()> {
        let incoming = MetricRecord::try_from(metric)?;
        let mut values = self.values.lock().await;
        match values.get_mut(&incoming.name) {
            Some(stored) => stored.apply(incoming.value),
            None => {
                values.insert(incoming.name.clone(), incoming);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get(&self, name: &MetricName) -> Result<Option<MetricRecord>> {
        Ok(self.values.lock().await.get(name).cloned())
    }

    async fn insert(&self, record: MetricRecord) -> Result<()> {
        self.values.lock().await.insert(record.name.clone(), record);
        Ok(())
    }

    async fn update(&self, existing: &MetricRecord, value: MetricValue) -> Result<()> {
        let mut values = self.values.lock().await;
        let stored = values
            .get_mut(&existing.name)
            .ok_or_else(|| PulseError::MetricNotFound { name: existing.name.to_string() })?;
        stored.apply(value)
    }

    async fn get_all(&self) -> Result<HashMap<MetricName, MetricRecord>> {
        Ok(self.values.lock().await.clone())
    }

    /// Entries are applied one lock acquisition at a time. A failing entry stops the
    /// batch but earlier entries stay applied.
    async fn batch_update(&self, metrics: &[Metrics]) -> Result<()> {
        for metric in metrics {
            self.apply_one(metric).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
