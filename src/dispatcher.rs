//! Batch Dispatcher - fans a change-feed batch out to the view processor.
//!
//! Every reading in a batch is processed concurrently; within a reading,
//! the device and global updates run side by side. The dispatcher waits
//! for every operation to finish before reporting, so a failure never
//! cancels an update that is already in flight.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::ProcessorConfig;
use crate::processor::{UpdateOutcome, ViewError, ViewProcessor};
use crate::reading::Reading;
use crate::store::{DocumentStore, RequestCharge};

/// Error type for batch dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// At least one reading could not be applied. The batch must not be
    /// acknowledged.
    #[error("{failed} of {total} readings failed; batch not acknowledged")]
    BatchFailed {
        failed: usize,
        total: usize,
        #[source]
        first: ViewError,
    },

    /// A processing task panicked or was aborted.
    #[error("reading task did not complete: {0}")]
    TaskPanicked(String),
}

/// Statistics for a successfully applied batch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchStats {
    pub readings: usize,
    /// Device-view read-modify-write cycles, retries included.
    pub device_attempts: u32,
    /// Global-view read-modify-write cycles, retries included.
    pub global_attempts: u32,
    pub charge: RequestCharge,
}

impl BatchStats {
    fn record(&mut self, device: UpdateOutcome, global: UpdateOutcome) {
        self.readings += 1;
        self.device_attempts += device.attempts;
        self.global_attempts += global.attempts;
        self.charge += device.charge + global.charge;
    }
}

type ReadingResult = (Result<UpdateOutcome, ViewError>, Result<UpdateOutcome, ViewError>);

/// Applies whole batches of readings through a shared [`ViewProcessor`].
pub struct BatchDispatcher<S> {
    processor: Arc<ViewProcessor<S>>,
    in_flight: Option<Arc<Semaphore>>,
}

impl<S> Clone for BatchDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<S: DocumentStore + 'static> BatchDispatcher<S> {
    /// Dispatch every reading of a batch at once.
    pub fn new(processor: ViewProcessor<S>) -> Self {
        Self {
            processor: Arc::new(processor),
            in_flight: None,
        }
    }

    /// Build a processor and dispatcher from one config.
    pub fn from_config(store: S, config: &ProcessorConfig) -> Self {
        let dispatcher = Self::new(ViewProcessor::with_config(store, config));
        match config.max_in_flight {
            Some(limit) => dispatcher.with_max_in_flight(limit),
            None => dispatcher,
        }
    }

    /// Bound how many readings are processed at once.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.in_flight = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    pub fn processor(&self) -> &ViewProcessor<S> {
        &self.processor
    }

    /// Apply a batch of readings.
    ///
    /// Returns `Ok` only if both updates succeeded for every reading. An
    /// empty batch is a no-op.
    pub async fn dispatch(&self, readings: Vec<Reading>) -> Result<BatchStats, DispatchError> {
        let total = readings.len();
        if total == 0 {
            return Ok(BatchStats::default());
        }
        debug!(readings = total, "dispatching batch");

        let mut tasks: JoinSet<ReadingResult> = JoinSet::new();
        for reading in readings {
            let processor = Arc::clone(&self.processor);
            let in_flight = self.in_flight.clone();

            tasks.spawn(async move {
                let _permit = match in_flight {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                tokio::join!(
                    processor.update_device_view(&reading),
                    processor.update_global_view(&reading),
                )
            });
        }

        let mut stats = BatchStats::default();
        let mut failed = 0;
        let mut first_error: Option<ViewError> = None;
        let mut panicked: Option<String> = None;

        while let Some(joined) = tasks.join_next().await {
            let (device, global) = match joined {
                Ok(results) => results,
                Err(join_err) => {
                    error!(error = %join_err, "reading task did not complete");
                    failed += 1;
                    panicked.get_or_insert_with(|| join_err.to_string());
                    continue;
                }
            };

            match (device, global) {
                (Ok(device), Ok(global)) => stats.record(device, global),
                (device, global) => {
                    failed += 1;
                    for err in [device.err(), global.err()].into_iter().flatten() {
                        error!(error = %err, cause = ?std::error::Error::source(&err), "view update failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        if let Some(first) = first_error {
            return Err(DispatchError::BatchFailed {
                failed,
                total,
                first,
            });
        }
        if let Some(message) = panicked {
            return Err(DispatchError::TaskPanicked(message));
        }

        debug!(
            readings = stats.readings,
            charge = %stats.charge,
            "batch applied"
        );
        Ok(stats)
    }
}
