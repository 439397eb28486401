//! Fault-injecting document store for testing retry and concurrency paths.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sensor_views::{
    Charged, DocumentKey, DocumentStore, InMemoryDocumentStore, Precondition, StoreError,
    StoredDocument, VersionToken,
};
use tokio::sync::Barrier;

#[derive(Default)]
struct Faults {
    /// Pending throttled reads and writes per partition, with the suggested delay.
    throttle_reads: HashMap<String, (u32, Duration)>,
    throttle_writes: HashMap<String, (u32, Duration)>,
    /// Pending rival writes per partition, applied just before a conditional upsert.
    interfere: HashMap<String, u32>,
    rival_writes: u32,
    /// Partitions whose writes are rejected outright.
    deny: HashSet<String>,
    /// Barrier the next `n` upserts on a partition wait on before writing.
    hold: HashMap<String, (u32, Arc<Barrier>)>,
}

#[derive(Default)]
struct CallLog {
    reads: HashMap<String, usize>,
    writes: HashMap<String, usize>,
}

/// Wraps an [`InMemoryDocumentStore`] and injects faults per partition.
///
/// Faults are keyed by partition, so `"007"` targets device 007's view and
/// `"global"` targets the global view.
///
/// ## Example
///
/// ```ignore
/// let store = FaultyStore::new();
/// store.throttle_writes("global", 2, Duration::from_millis(50));
///
/// let processor = ViewProcessor::new(store.clone());
/// processor.update_global_view(&reading).await?; // succeeds on attempt 3
/// ```
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: InMemoryDocumentStore,
    faults: Arc<Mutex<Faults>>,
    log: Arc<Mutex<CallLog>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for inspecting documents without going through faults.
    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    /// Throttle the next `count` reads of `partition`.
    pub fn throttle_reads(&self, partition: &str, count: u32, retry_after: Duration) {
        self.faults
            .lock()
            .unwrap()
            .throttle_reads
            .insert(partition.to_string(), (count, retry_after));
    }

    /// Throttle the next `count` writes to `partition`.
    pub fn throttle_writes(&self, partition: &str, count: u32, retry_after: Duration) {
        self.faults
            .lock()
            .unwrap()
            .throttle_writes
            .insert(partition.to_string(), (count, retry_after));
    }

    /// Before each of the next `count` conditional writes to `partition`, let a
    /// rival writer update the document first, so the write's version is stale.
    ///
    /// Each rival write adds `rival-N` to the document's `deviceSummary`.
    pub fn interfere_with_writes(&self, partition: &str, count: u32) {
        self.faults
            .lock()
            .unwrap()
            .interfere
            .insert(partition.to_string(), count);
    }

    /// Reject every write to `partition` with a permission error.
    pub fn deny_writes(&self, partition: &str) {
        self.faults
            .lock()
            .unwrap()
            .deny
            .insert(partition.to_string());
    }

    pub fn allow_writes(&self, partition: &str) {
        self.faults.lock().unwrap().deny.remove(partition);
    }

    /// Hold the next `parties` writes to `partition` until all of them have
    /// read, so they race on the same version.
    pub fn hold_writes(&self, partition: &str, parties: u32) {
        self.faults.lock().unwrap().hold.insert(
            partition.to_string(),
            (parties, Arc::new(Barrier::new(parties as usize))),
        );
    }

    pub fn reads(&self, partition: &str) -> usize {
        self.log.lock().unwrap().reads.get(partition).copied().unwrap_or(0)
    }

    pub fn writes(&self, partition: &str) -> usize {
        self.log.lock().unwrap().writes.get(partition).copied().unwrap_or(0)
    }

    pub fn rival_writes(&self) -> u32 {
        self.faults.lock().unwrap().rival_writes
    }

    /// Document body for `partition:id`, if present.
    pub fn body(&self, id: &str, partition: &str) -> Option<Value> {
        self.inner
            .document(&DocumentKey::new(id, partition))
            .map(|doc| doc.body)
    }

    fn take_throttle(&self, partition: &str, reading: bool) -> Option<Duration> {
        let mut faults = self.faults.lock().unwrap();
        let pending = if reading {
            &mut faults.throttle_reads
        } else {
            &mut faults.throttle_writes
        };
        match pending.get_mut(partition) {
            Some((remaining, delay)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*delay)
            }
            _ => None,
        }
    }

    fn take_hold(&self, partition: &str) -> Option<Arc<Barrier>> {
        let mut faults = self.faults.lock().unwrap();
        match faults.hold.get_mut(partition) {
            Some((remaining, barrier)) if *remaining > 0 => {
                *remaining -= 1;
                Some(Arc::clone(barrier))
            }
            _ => None,
        }
    }

    fn take_rival(&self, partition: &str) -> Option<u32> {
        let mut faults = self.faults.lock().unwrap();
        match faults.interfere.get_mut(partition) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                faults.rival_writes += 1;
                Some(faults.rival_writes)
            }
            _ => None,
        }
    }

    async fn rival_write(&self, key: &DocumentKey, n: u32) -> Result<(), StoreError> {
        let Some(current) = self.inner.document(key) else {
            return Ok(());
        };
        let mut body = current.body;
        body["deviceSummary"][format!("rival-{n}")] = json!(f64::from(n));
        self.inner
            .upsert(key, body, Precondition::IfMatch(current.version))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, key: &DocumentKey) -> Result<Charged<Option<StoredDocument>>, StoreError> {
        *self
            .log
            .lock()
            .unwrap()
            .reads
            .entry(key.partition.clone())
            .or_default() += 1;

        if let Some(retry_after) = self.take_throttle(&key.partition, true) {
            return Err(StoreError::Throttled { retry_after });
        }

        self.inner.get(key).await
    }

    async fn upsert(
        &self,
        key: &DocumentKey,
        body: Value,
        precondition: Precondition,
    ) -> Result<Charged<VersionToken>, StoreError> {
        *self
            .log
            .lock()
            .unwrap()
            .writes
            .entry(key.partition.clone())
            .or_default() += 1;

        if let Some(barrier) = self.take_hold(&key.partition) {
            barrier.wait().await;
        }

        if self.faults.lock().unwrap().deny.contains(&key.partition) {
            return Err(StoreError::PermissionDenied(format!("writes to {key} are denied")));
        }

        if let Some(retry_after) = self.take_throttle(&key.partition, false) {
            return Err(StoreError::Throttled { retry_after });
        }

        if precondition != Precondition::None {
            if let Some(n) = self.take_rival(&key.partition) {
                self.rival_write(key, n).await?;
            }
        }

        self.inner.upsert(key, body, precondition).await
    }
}
