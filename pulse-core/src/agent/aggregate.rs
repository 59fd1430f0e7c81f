//! Aggregation stage: folds every collection queue into the local repository.

use crate::storage::Repository;
use crate::types::Metrics;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, warn};

/// Drain `queues` into `repo` until every queue has closed.
///
/// Returns the number of events applied. Rejected events are logged and dropped.
pub async fn aggregate<R>(repo: &R, queues: Vec<mpsc::Receiver<Metrics>>) -> usize
where
    R: Repository + ?Sized,
{
    let mut streams = StreamMap::new();
    for (index, queue) in queues.into_iter().enumerate() {
        streams.insert(index, ReceiverStream::new(queue));
    }

    let mut applied = 0;
    while let Some((queue, metric)) = streams.next().await {
        match repo.upsert(&metric).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(queue, metric = %metric.id, error = %e, "Dropping event"),
        }
    }
    debug!(applied, "All collection queues closed");
    applied
}
