use serde::{Deserialize, Serialize};

use crate::reading::Reading;
use crate::View;

/// Rolling aggregate for a single device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, View)]
#[serde(rename_all = "camelCase")]
#[view(kind = "device")]
pub struct DeviceView {
    #[view(id)]
    pub id: String,
    #[serde(rename = "type")]
    pub view_type: String,
    #[view(partition)]
    pub device_id: String,
    /// Sum of every value folded in, in application order.
    pub aggregation_sum: f64,
    pub last_value: f64,
    pub last_update: String,
}

impl DeviceView {
    /// Start a view from the first reading seen for a device.
    pub fn new(reading: &Reading) -> Self {
        Self {
            id: reading.device_id.clone(),
            view_type: <Self as crate::ViewDocument>::KIND.to_string(),
            device_id: reading.device_id.clone(),
            aggregation_sum: reading.value,
            last_value: reading.value,
            last_update: reading.timestamp_string(),
        }
    }

    /// Fold a reading into the aggregate.
    ///
    /// Not idempotent: applying the same reading twice counts it twice.
    pub fn apply(&mut self, reading: &Reading) {
        self.aggregation_sum += reading.value;
        self.last_value = reading.value;
        self.last_update = reading.timestamp_string();
    }

    /// JSON has no encoding for infinities or NaN; a sum that overflowed
    /// would be written as `null` and never read back.
    pub fn is_storable(&self) -> bool {
        self.aggregation_sum.is_finite() && self.last_value.is_finite()
    }
}
