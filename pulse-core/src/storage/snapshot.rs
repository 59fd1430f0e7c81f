//! Memory repository with a durable JSON snapshot file.
//!
//! The file holds one compact JSON DTO per line and is rewritten from offset zero on
//! every backup. Backups are taken after a mutation once `store_interval` has elapsed
//! since the previous one, and unconditionally on close.

use super::{MemoryRepository, Repository};
use crate::error::{PulseError, Result};
use crate::transport::retry::RetrySchedule;
use crate::types::{MetricName, MetricRecord, MetricValue, Metrics};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Snapshot-backed repository. Without a file path it is a plain pass-through.
pub struct SnapshotRepository {
    inner: MemoryRepository,
    backup: Option<Backup>,
}

struct Backup {
    path: PathBuf,
    interval: Duration,
    state: Mutex<BackupState>,
}

struct BackupState {
    /// `None` once closed.
    file: Option<File>,
    last_stored: Option<Instant>,
}

impl Backup {
    fn is_due(&self, state: &BackupState) -> bool {
        self.interval.is_zero()
            || state.last_stored.map_or(true, |at| at.elapsed() > self.interval)
    }

    fn io_error(&self, source: std::io::Error) -> PulseError {
        PulseError::IoError { path: self.path.clone(), source }
    }
}

async fn open_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| PulseError::IoError { path: path.to_path_buf(), source: e })
}

impl SnapshotRepository {
    /// Create the repository, restoring previous contents when `restore` is set.
    ///
    /// The backing file is opened under the retry schedule.
    pub async fn new(
        path: Option<PathBuf>,
        store_interval: Duration,
        restore: bool,
    ) -> Result<Self> {
        let inner = MemoryRepository::new();
        let Some(path) = path else {
            info!("No snapshot file configured, backups disabled");
            return Ok(Self { inner, backup: None });
        };

        let path_ref = path.as_path();
        let mut file = RetrySchedule::default()
            .run(&CancellationToken::new(), move || open_file(path_ref))
            .await?;

        if restore {
            let mut content = Vec::new();
            file.read_to_end(&mut content)
                .await
                .map_err(|e| PulseError::IoError { path: path.clone(), source: e })?;
            let restored = restore_into(&inner, &content).await?;
            info!(path = %path.display(), restored, "Restored metrics from snapshot");
        }

        let backup = Backup {
            path,
            interval: store_interval,
            state: Mutex::new(BackupState { file: Some(file), last_stored: None }),
        };
        Ok(Self { inner, backup: Some(backup) })
    }

    /// Whether mutations are persisted to a file.
    pub fn is_durable(&self) -> bool {
        self.backup.is_some()
    }

    /// Write the full snapshot now.
    #[instrument(skip(self))]
    pub async fn backup(&self) -> Result<()> {
        let Some(backup) = &self.backup else {
            return Ok(());
        };
        let mut state = backup.state.lock().await;
        self.write_snapshot(backup, &mut state).await
    }

    async fn backup_if_due(&self) -> Result<()> {
        let Some(backup) = &self.backup else {
            return Ok(());
        };
        let mut state = backup.state.lock().await;
        if backup.is_due(&state) {
            self.write_snapshot(backup, &mut state).await?;
        }
        Ok(())
    }

    async fn write_snapshot(&self, backup: &Backup, state: &mut BackupState) -> Result<()> {
        let items = self.inner.get_all().await?;
        let mut buf = Vec::with_capacity(items.len() * 48);
        for record in items.values() {
            serde_json::to_writer(&mut buf, &Metrics::from(record))?;
            buf.push(b'\n');
        }

        let file = state.file.as_mut().ok_or_else(|| {
            backup.io_error(std::io::Error::new(
                std::io::ErrorKind::Other,
                "snapshot file is closed",
            ))
        })?;
        file.set_len(0).await.map_err(|e| backup.io_error(e))?;
        file.seek(SeekFrom::Start(0)).await.map_err(|e| backup.io_error(e))?;
        file.write_all(&buf).await.map_err(|e| backup.io_error(e))?;
        file.flush().await.map_err(|e| backup.io_error(e))?;
        file.sync_data().await.map_err(|e| backup.io_error(e))?;

        state.last_stored = Some(Instant::now());
        metrics::counter!("pulse_storage_backups_total").increment(1);
        debug!(path = %backup.path.display(), metrics = items.len(), "Snapshot written");
        Ok(())
    }
}

/// Replay a snapshot into `repo` without triggering backups.
async fn restore_into(repo: &MemoryRepository, content: &[u8]) -> Result<usize> {
    let mut restored = 0;
    for metric in serde_json::Deserializer::from_slice(content).into_iter::<Metrics>() {
        let record = MetricRecord::try_from(&metric?)?;
        repo.insert(record).await?;
        restored += 1;
    }
    Ok(restored)
}

#[async_trait]
impl Repository for SnapshotRepository {
    async fn get(&self, name: &MetricName) -> Result<Option<MetricRecord>> {
        self.inner.get(name).await
    }

    async fn insert(&self, record: MetricRecord) -> Result<()> {
        self.inner.insert(record).await?;
        self.backup_if_due().await
    }

    async fn update(&self, existing: &MetricRecord, value: MetricValue) -> Result<()> {
        self.inner.update(existing, value).await?;
        self.backup_if_due().await
    }

    async fn get_all(&self) -> Result<HashMap<MetricName, MetricRecord>> {
        self.inner.get_all().await
    }

    async fn batch_update(&self, metrics: &[Metrics]) -> Result<()> {
        self.inner.batch_update(metrics).await?;
        self.backup_if_due().await
    }

    /// Final unconditional backup, then the file handle is released.
    async fn close(&self) -> Result<()> {
        let Some(backup) = &self.backup else {
            return Ok(());
        };
        let mut state = backup.state.lock().await;
        if state.file.is_none() {
            return Ok(());
        }
        info!(path = %backup.path.display(), "Writing final snapshot before shutdown");
        self.write_snapshot(backup, &mut state).await?;
        state.file = None;
        Ok(())
    }
}
