//! Incremental materialized views over a stream of device sensor readings.
//!
//! A change feed delivers readings in at-least-once batches. For every
//! reading the [`ViewProcessor`] updates two documents in a
//! [`DocumentStore`]: the device's rolling [`DeviceView`] and the shared
//! [`GlobalView`]. The [`BatchDispatcher`] fans a batch out concurrently
//! and reports a single pass/fail, and the [`ViewMaintenanceWorker`]
//! checkpoints the feed only after a batch has been fully applied.

extern crate self as sensor_views;

pub mod config;
mod dispatcher;
pub mod feed;
mod processor;
mod reading;
pub mod simulator;
mod store;
mod view;

pub use config::{ConfigError, FeedConfig, ProcessorConfig, StoreConfig};
pub use dispatcher::{BatchDispatcher, BatchStats, DispatchError};
pub use feed::{
    ChangeFeed, FeedBatch, FeedError, InMemoryChangeFeed, Lease, ReadingSink,
    ViewMaintenanceWorker, WorkerError, WorkerHandle, WorkerStats,
};
pub use processor::{RetryPolicy, UpdateOutcome, ViewError, ViewKind, ViewProcessor};
pub use reading::{format_timestamp, DecodeError, RawReading, Reading};
pub use simulator::{SensorRange, SensorSimulator, SimulatorError, SimulatorStats};
pub use store::{
    Charged, DocumentKey, DocumentStore, InMemoryDocumentStore, Precondition, RequestCharge,
    StoreError, StoredDocument, VersionToken, Versioned, ViewRepository, ViewsExt,
};
pub use view::{DeviceView, GlobalView, ViewDocument, GLOBAL_VIEW_ID};

// Re-export the derive macro for view documents
pub use sensor_views_macros::View;

// Re-export async_trait so custom stores can implement DocumentStore
pub use async_trait::async_trait;
