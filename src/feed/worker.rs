//! Background worker that keeps the views in step with the change feed.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{ChangeFeed, FeedError};
use crate::dispatcher::{BatchDispatcher, BatchStats, DispatchError};
use crate::reading::{DecodeError, Reading};
use crate::store::DocumentStore;

/// Error type for one worker iteration. The batch involved was not
/// acknowledged and will be delivered again.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("record at position {position} could not be decoded")]
    Decode {
        position: u64,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Statistics from the view maintenance worker.
#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    pub polls: usize,
    pub batches_acknowledged: usize,
    pub batches_failed: usize,
    pub readings_processed: usize,
}

/// Pulls batches from a [`ChangeFeed`], applies them through a
/// [`BatchDispatcher`] and checkpoints each batch only once all of it
/// has been applied.
///
/// ## Example
///
/// ```ignore
/// use sensor_views::{BatchDispatcher, InMemoryChangeFeed, InMemoryDocumentStore, ViewMaintenanceWorker, ViewProcessor};
/// use std::time::Duration;
///
/// let feed = InMemoryChangeFeed::new();
/// let dispatcher = BatchDispatcher::new(ViewProcessor::new(InMemoryDocumentStore::new()));
///
/// let handle = ViewMaintenanceWorker::new(feed.clone(), dispatcher, 100)
///     .spawn(Duration::from_millis(1000));
///
/// // ... readings arrive on the feed ...
///
/// let stats = handle.stop().await;
/// ```
pub struct ViewMaintenanceWorker<F, S> {
    feed: F,
    dispatcher: BatchDispatcher<S>,
    max_batch_size: usize,
}

impl<F, S> ViewMaintenanceWorker<F, S>
where
    F: ChangeFeed + 'static,
    S: DocumentStore + 'static,
{
    pub fn new(feed: F, dispatcher: BatchDispatcher<S>, max_batch_size: usize) -> Self {
        Self {
            feed,
            dispatcher,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn dispatcher(&self) -> &BatchDispatcher<S> {
        &self.dispatcher
    }

    /// Process at most one batch.
    ///
    /// Returns `Ok(None)` when the feed is caught up. On any error the
    /// batch is left unacknowledged.
    pub async fn run_once(&self) -> Result<Option<BatchStats>, WorkerError> {
        let Some(batch) = self.feed.next_batch(self.max_batch_size).await? else {
            return Ok(None);
        };

        let readings = batch
            .records
            .iter()
            .enumerate()
            .map(|(offset, record)| {
                Reading::from_record(record).map_err(|source| WorkerError::Decode {
                    position: batch.lease.start + offset as u64,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let stats = self.dispatcher.dispatch(readings).await?;
        self.feed.checkpoint(&batch.lease).await?;

        info!(
            start = batch.lease.start,
            end = batch.lease.end,
            readings = stats.readings,
            charge = %stats.charge,
            "batch acknowledged"
        );
        Ok(Some(stats))
    }

    /// Run the worker in a background task until stopped.
    ///
    /// When caught up, or after a failed batch, the worker waits
    /// `poll_delay` before polling again. A batch in progress is always
    /// finished before the worker stops.
    pub fn spawn(self, poll_delay: Duration) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut stats = WorkerStats::default();

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Closed) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;

                let idle = match self.run_once().await {
                    Ok(Some(batch)) => {
                        stats.batches_acknowledged += 1;
                        stats.readings_processed += batch.readings;
                        false
                    }
                    Ok(None) => true,
                    Err(err) => {
                        stats.batches_failed += 1;
                        error!(error = %err, "batch failed, leaving it for redelivery");
                        true
                    }
                };

                if idle {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = tokio::time::sleep(poll_delay) => {}
                    }
                }
            }

            stats
        });

        WorkerHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

/// Handle to a running [`ViewMaintenanceWorker`].
pub struct WorkerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl WorkerHandle {
    /// Signal the worker to stop and wait for it to finish.
    /// Returns the worker statistics.
    pub async fn stop(mut self) -> WorkerStats {
        self.signal_stop();
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(join_err) => {
                    error!(error = %join_err, "worker task did not complete");
                    WorkerStats::default()
                }
            },
            None => WorkerStats::default(),
        }
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.signal_stop();
        // Don't join on drop - let the task finish its current batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedBatch, InMemoryChangeFeed, Lease};
    use crate::processor::ViewProcessor;
    use crate::store::InMemoryDocumentStore;
    use async_trait::async_trait;

    struct BrokenFeed;

    #[async_trait]
    impl ChangeFeed for BrokenFeed {
        async fn next_batch(&self, _max_items: usize) -> Result<Option<FeedBatch>, FeedError> {
            panic!("feed connection lost");
        }

        async fn checkpoint(&self, _lease: &Lease) -> Result<(), FeedError> {
            Ok(())
        }
    }

    fn dispatcher() -> BatchDispatcher<InMemoryDocumentStore> {
        BatchDispatcher::new(ViewProcessor::new(InMemoryDocumentStore::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn stop_reports_polls_of_an_idle_worker() {
        let handle = ViewMaintenanceWorker::new(InMemoryChangeFeed::new(), dispatcher(), 10)
            .spawn(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.polls, 3);
        assert_eq!(stats.batches_acknowledged, 0);
    }

    #[tokio::test]
    async fn stop_returns_after_the_worker_task_panicked() {
        let handle =
            ViewMaintenanceWorker::new(BrokenFeed, dispatcher(), 10).spawn(Duration::from_millis(10));

        tokio::task::yield_now().await;
        let stats = handle.stop().await;

        assert_eq!(stats.polls, 0);
        assert_eq!(stats.batches_acknowledged, 0);
    }
}
