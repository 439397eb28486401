//! Views - the persisted, read-optimized documents derived from readings.
//!
//! Two view types are maintained:
//!
//! - [`DeviceView`]: one per device, partitioned by device id, carrying a
//!   running sum and the last value seen.
//! - [`GlobalView`]: a single document under the fixed key `"global"`,
//!   mapping every device to its last-seen value.

mod device;
mod global;

use serde::{de::DeserializeOwned, Serialize};

use crate::store::DocumentKey;

/// Trait for types that can be stored as view documents.
///
/// Usually derived with `#[derive(View)]`.
pub trait ViewDocument: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The `type` discriminator stored in every document of this view.
    const KIND: &'static str;

    /// Returns the document id.
    fn id(&self) -> &str;

    /// Returns the partition key the document is routed by.
    fn partition_key(&self) -> &str;

    /// Returns the full store address of this document.
    fn key(&self) -> DocumentKey {
        DocumentKey::new(self.id(), self.partition_key())
    }
}

pub use device::DeviceView;
pub use global::{GlobalView, GLOBAL_VIEW_ID};
