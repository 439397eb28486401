//! Store Gateway - keyed document storage for materialized views.
//!
//! The gateway is a narrow capability interface over a document store:
//! point reads, keyed upserts with an optional version precondition, and
//! a distinguishable throttling error that carries the server's suggested
//! retry delay. Every call reports a [`RequestCharge`].
//!
//! ## Example
//!
//! ```ignore
//! use sensor_views::{DocumentStore, DeviceView, InMemoryDocumentStore, Precondition, ViewsExt};
//!
//! let store = InMemoryDocumentStore::new();
//! let saved = store.views::<DeviceView>().upsert(&view, Precondition::None).await?;
//! let loaded = store.views::<DeviceView>().get("007", "007").await?;
//! ```

mod in_memory;
mod repository;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Address of a document: its id plus the partition it is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub id: String,
    pub partition: String,
}

impl DocumentKey {
    pub fn new(id: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition: partition.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.id)
    }
}

/// Opaque version stamp (etag) assigned by the store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cost reported by the store for a single call. Observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct RequestCharge(pub f64);

impl std::ops::Add for RequestCharge {
    type Output = RequestCharge;

    fn add(self, rhs: RequestCharge) -> RequestCharge {
        RequestCharge(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for RequestCharge {
    fn add_assign(&mut self, rhs: RequestCharge) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for RequestCharge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// A store response paired with the charge the call incurred.
#[derive(Debug, Clone)]
pub struct Charged<T> {
    pub value: T,
    pub charge: RequestCharge,
}

impl<T> Charged<T> {
    pub fn new(value: T, charge: RequestCharge) -> Self {
        Self { value, charge }
    }
}

/// A raw document as read from the store, with its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub body: Value,
    pub version: VersionToken,
}

/// A typed document with the version it was read or written at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub data: T,
    pub version: VersionToken,
}

/// Write precondition for [`DocumentStore::upsert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Precondition {
    /// Create or replace unconditionally.
    #[default]
    None,
    /// Replace only if the stored version still matches.
    IfMatch(VersionToken),
    /// Create only; fails if a document already exists under the key.
    IfAbsent,
}

impl From<Option<VersionToken>> for Precondition {
    fn from(expected: Option<VersionToken>) -> Self {
        match expected {
            Some(version) => Precondition::IfMatch(version),
            None => Precondition::None,
        }
    }
}

/// Error type for document store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store is shedding load; retry after the suggested delay.
    #[error("request throttled, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    /// A write precondition did not hold.
    #[error("concurrency conflict on {partition}:{id}")]
    ConcurrencyConflict { id: String, partition: String },

    /// Document body could not be (de)serialized.
    #[error("document serialization error: {0}")]
    Serde(String),

    /// Caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other storage-level failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn conflict(key: &DocumentKey) -> Self {
        StoreError::ConcurrencyConflict {
            id: key.id.clone(),
            partition: key.partition.clone(),
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, StoreError::Throttled { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }

    /// The server-suggested delay, if this is a throttling error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

/// Capability interface over a keyed document store.
///
/// Implementations may block on network I/O in every call. A missing
/// document is `Ok(None)`, not an error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read by id and partition.
    async fn get(&self, key: &DocumentKey) -> Result<Charged<Option<StoredDocument>>, StoreError>;

    /// Create or replace a document, subject to `precondition`.
    ///
    /// Returns the new version of the document.
    async fn upsert(
        &self,
        key: &DocumentKey,
        body: Value,
        precondition: Precondition,
    ) -> Result<Charged<VersionToken>, StoreError>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    async fn get(&self, key: &DocumentKey) -> Result<Charged<Option<StoredDocument>>, StoreError> {
        (**self).get(key).await
    }

    async fn upsert(
        &self,
        key: &DocumentKey,
        body: Value,
        precondition: Precondition,
    ) -> Result<Charged<VersionToken>, StoreError> {
        (**self).upsert(key, body, precondition).await
    }
}

pub use in_memory::InMemoryDocumentStore;
pub use repository::{ViewRepository, ViewsExt};
