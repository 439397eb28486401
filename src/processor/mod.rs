//! View Processor - the read-modify-write engine behind both views.
//!
//! Each reading updates two documents:
//!
//! - its [`DeviceView`], partitioned by device and written last-writer-wins,
//!   since only that device's own stream contends for it;
//! - the [`GlobalView`], a single hot document contended by every device,
//!   written with an `IfMatch` precondition and re-read, re-merged and
//!   re-written on conflict.
//!
//! Retries are local to each operation. Callers only ever see success or
//! a single [`ViewError`].

mod retry;

use std::fmt;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProcessorConfig;
use crate::reading::Reading;
use crate::store::{
    DocumentKey, DocumentStore, Precondition, RequestCharge, StoreError, Versioned, ViewsExt,
};
use crate::view::{DeviceView, GlobalView, GLOBAL_VIEW_ID};

pub use retry::RetryPolicy;
use retry::RetryDecision;

/// Which of the two views an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Device,
    Global,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::Device => f.write_str("device"),
            ViewKind::Global => f.write_str("global"),
        }
    }
}

/// Error type for view updates.
#[derive(Debug, Error)]
pub enum ViewError {
    /// Recovery was attempted and failed: every attempt in the budget hit
    /// throttling or (global view only) a concurrency conflict.
    #[error("{view} view update for {key} gave up after {attempts} attempts")]
    RetryBudgetExhausted {
        view: ViewKind,
        key: DocumentKey,
        attempts: u32,
        #[source]
        last: StoreError,
    },

    /// A non-retryable store error.
    #[error("{view} view update for {key} failed")]
    Store {
        view: ViewKind,
        key: DocumentKey,
        #[source]
        source: StoreError,
    },
}

impl ViewError {
    pub fn view(&self) -> ViewKind {
        match self {
            ViewError::RetryBudgetExhausted { view, .. } | ViewError::Store { view, .. } => *view,
        }
    }

    pub fn is_retry_budget_exhausted(&self) -> bool {
        matches!(self, ViewError::RetryBudgetExhausted { .. })
    }
}

/// Result of one successful view update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateOutcome {
    /// Read-modify-write cycles run, the successful one included.
    pub attempts: u32,
    /// Total charge of every store call made, failed attempts included.
    pub charge: RequestCharge,
}

/// Maintains the device and global views in a [`DocumentStore`].
pub struct ViewProcessor<S> {
    store: S,
    device_policy: RetryPolicy,
    global_policy: RetryPolicy,
}

impl<S: DocumentStore> ViewProcessor<S> {
    /// Create a processor with the default budgets (3 device attempts,
    /// 10 global attempts).
    pub fn new(store: S) -> Self {
        Self::with_config(store, &ProcessorConfig::default())
    }

    pub fn with_config(store: S, config: &ProcessorConfig) -> Self {
        Self {
            store,
            device_policy: RetryPolicy::throttling(config.device_max_attempts),
            global_policy: RetryPolicy::optimistic(config.global_max_attempts),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn device_policy(&self) -> RetryPolicy {
        self.device_policy
    }

    pub fn global_policy(&self) -> RetryPolicy {
        self.global_policy
    }

    /// Fold `reading` into its device's rolling aggregate.
    ///
    /// Writes without a precondition. Throttling restarts the whole
    /// read-modify-write cycle after the suggested delay.
    pub async fn update_device_view(&self, reading: &Reading) -> Result<UpdateOutcome, ViewError> {
        let key = DocumentKey::new(&reading.device_id, &reading.device_id);
        let mut charge = RequestCharge::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.device_cycle(reading, &mut charge).await {
                Ok(()) => return Ok(UpdateOutcome { attempts: attempt, charge }),
                Err(err) => err,
            };
            self.back_off(ViewKind::Device, &key, self.device_policy, attempt, err)
                .await?;
        }
    }

    /// Record `reading` as its device's last value in the global view.
    ///
    /// Writes with the version captured by the read. A conflict or
    /// throttle restarts from a fresh read, so merged state is never
    /// reused across attempts.
    pub async fn update_global_view(&self, reading: &Reading) -> Result<UpdateOutcome, ViewError> {
        let key = DocumentKey::new(GLOBAL_VIEW_ID, GLOBAL_VIEW_ID);
        let mut charge = RequestCharge::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.global_cycle(reading, &mut charge).await {
                Ok(()) => return Ok(UpdateOutcome { attempts: attempt, charge }),
                Err(err) => err,
            };
            self.back_off(ViewKind::Global, &key, self.global_policy, attempt, err)
                .await?;
        }
    }

    async fn device_cycle(
        &self,
        reading: &Reading,
        charge: &mut RequestCharge,
    ) -> Result<(), StoreError> {
        let views = self.store.views::<DeviceView>();

        let read = views.get(&reading.device_id, &reading.device_id).await?;
        *charge += read.charge;

        let view = match read.value {
            Some(Versioned { mut data, .. }) => {
                data.apply(reading);
                data
            }
            None => {
                info!(device_id = %reading.device_id, "creating device view");
                DeviceView::new(reading)
            }
        };

        if !view.is_storable() {
            return Err(StoreError::Serde(format!(
                "device view {} aggregate is not finite ({})",
                reading.device_id, view.aggregation_sum
            )));
        }

        let written = views.upsert(&view, Precondition::None).await?;
        *charge += written.charge;
        debug!(
            device_id = %reading.device_id,
            charge = %written.charge,
            aggregation_sum = view.aggregation_sum,
            "device view written"
        );
        Ok(())
    }

    async fn global_cycle(
        &self,
        reading: &Reading,
        charge: &mut RequestCharge,
    ) -> Result<(), StoreError> {
        let views = self.store.views::<GlobalView>();

        let read = views.get(GLOBAL_VIEW_ID, GLOBAL_VIEW_ID).await?;
        *charge += read.charge;

        let (mut view, precondition) = match read.value {
            Some(Versioned { data, version }) => (data, Precondition::IfMatch(version)),
            None => {
                info!("creating global view");
                (GlobalView::new(Utc::now()), Precondition::IfAbsent)
            }
        };
        view.merge(reading, Utc::now());
        if !view.is_storable() {
            return Err(StoreError::Serde(format!(
                "global view entry for {} is not finite ({})",
                reading.device_id, reading.value
            )));
        }

        let written = views.upsert(&view, precondition).await?;
        *charge += written.charge;
        debug!(
            device_id = %reading.device_id,
            charge = %written.charge,
            devices = view.device_summary.len(),
            "global view written"
        );
        Ok(())
    }

    async fn back_off(
        &self,
        view: ViewKind,
        key: &DocumentKey,
        policy: RetryPolicy,
        attempt: u32,
        err: StoreError,
    ) -> Result<(), ViewError> {
        match policy.decide(attempt, &err) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    %view,
                    %key,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "throttled, waiting before retry"
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            RetryDecision::RetryNow => {
                warn!(
                    %view,
                    %key,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "optimistic concurrency check failed, retrying"
                );
                Ok(())
            }
            RetryDecision::Exhausted => Err(ViewError::RetryBudgetExhausted {
                view,
                key: key.clone(),
                attempts: attempt,
                last: err,
            }),
            RetryDecision::Fatal => Err(ViewError::Store {
                view,
                key: key.clone(),
                source: err,
            }),
        }
    }
}
