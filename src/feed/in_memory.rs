//! InMemoryChangeFeed - an append-only source collection with a single checkpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ChangeFeed, FeedBatch, FeedError, Lease, ReadingSink};

#[derive(Default)]
struct FeedState {
    records: Vec<Value>,
    checkpoint: u64,
    throttle_writes: u32,
    throttle_delay: Duration,
}

/// In-memory change feed for testing and development.
///
/// Records are appended through [`ReadingSink::create`] and delivered in
/// order. Delivery always restarts at the checkpoint, so a batch that is
/// never checkpointed is delivered again. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemoryChangeFeed {
    state: Arc<Mutex<FeedState>>,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record directly, bypassing throttling.
    pub fn push(&self, record: Value) {
        if let Ok(mut state) = self.state.lock() {
            state.records.push(record);
        }
    }

    /// Reject the next `count` writes with a throttling error.
    pub fn throttle_next_writes(&self, count: u32, retry_after: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.throttle_writes = count;
            state.throttle_delay = retry_after;
        }
    }

    /// Position of the first unacknowledged record.
    pub fn checkpoint_position(&self) -> u64 {
        self.state.lock().map(|s| s.checkpoint).unwrap_or(0)
    }

    /// Total records ever written.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records written but not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.records.len() - s.checkpoint as usize)
            .unwrap_or(0)
    }

    /// Wait for every record to be acknowledged, checking at most
    /// `max_polls` times `poll_delay` apart. Returns whether the feed drained.
    pub async fn wait_until_drained(&self, poll_delay: Duration, max_polls: usize) -> bool {
        for _ in 0..max_polls {
            if self.pending() == 0 {
                return true;
            }
            tokio::time::sleep(poll_delay).await;
        }
        self.pending() == 0
    }

    fn poisoned() -> FeedError {
        FeedError::Unavailable("feed lock poisoned".into())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn next_batch(&self, max_items: usize) -> Result<Option<FeedBatch>, FeedError> {
        let state = self.state.lock().map_err(|_| Self::poisoned())?;

        let start = state.checkpoint as usize;
        if start >= state.records.len() || max_items == 0 {
            return Ok(None);
        }
        let end = (start + max_items).min(state.records.len());

        Ok(Some(FeedBatch {
            lease: Lease {
                start: start as u64,
                end: end as u64,
            },
            records: state.records[start..end].to_vec(),
        }))
    }

    async fn checkpoint(&self, lease: &Lease) -> Result<(), FeedError> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;

        if lease.start != state.checkpoint
            || lease.end < lease.start
            || lease.end as usize > state.records.len()
        {
            return Err(FeedError::StaleLease {
                start: lease.start,
                end: lease.end,
                checkpoint: state.checkpoint,
            });
        }

        state.checkpoint = lease.end;
        Ok(())
    }
}

#[async_trait]
impl ReadingSink for InMemoryChangeFeed {
    async fn create(&self, record: Value) -> Result<(), FeedError> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;

        if state.throttle_writes > 0 {
            state.throttle_writes -= 1;
            return Err(FeedError::Throttled {
                retry_after: state.throttle_delay,
            });
        }

        state.records.push(record);
        Ok(())
    }
}
