//! Change feed - at-least-once batches of raw records from the source collection.
//!
//! A batch carries a [`Lease`]. The consumer checkpoints the lease once
//! every record in the batch has been applied; until then the feed keeps
//! redelivering the same records.

mod in_memory;
mod worker;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error type for change feed operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The lease does not start at the feed's current checkpoint; the
    /// batch was already acknowledged or belongs to another consumer.
    #[error("stale lease [{start}, {end}) against checkpoint {checkpoint}")]
    StaleLease {
        start: u64,
        end: u64,
        checkpoint: u64,
    },

    /// The source collection is rejecting writes; retry after the delay.
    #[error("source collection throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    #[error("change feed unavailable: {0}")]
    Unavailable(String),
}

/// Position range of a delivered batch: records `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub start: u64,
    pub end: u64,
}

impl Lease {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One delivery from the change feed.
#[derive(Debug, Clone)]
pub struct FeedBatch {
    pub lease: Lease,
    pub records: Vec<Value>,
}

/// Consumer side of a change feed subscription.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Next batch of at most `max_items` records starting at the current
    /// checkpoint, or `None` when caught up.
    async fn next_batch(&self, max_items: usize) -> Result<Option<FeedBatch>, FeedError>;

    /// Acknowledge a batch. Only after this does the feed move past it.
    async fn checkpoint(&self, lease: &Lease) -> Result<(), FeedError>;
}

/// Producer side: writes raw records into the source collection.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn create(&self, record: Value) -> Result<(), FeedError>;
}

pub use in_memory::InMemoryChangeFeed;
pub use worker::{ViewMaintenanceWorker, WorkerError, WorkerHandle, WorkerStats};
