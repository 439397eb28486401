use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::{format_timestamp, Reading};
use crate::View;

/// Fixed id (and partition key) of the single global view document.
pub const GLOBAL_VIEW_ID: &str = "global";

/// Cross-device summary: the last value seen for every device.
///
/// This is the one deliberately shared document; every reading writes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, View)]
#[serde(rename_all = "camelCase")]
#[view(kind = "global")]
pub struct GlobalView {
    #[view(id)]
    pub id: String,
    #[serde(rename = "type")]
    pub view_type: String,
    #[view(partition)]
    pub device_id: String,
    /// Last-value snapshot per device, not an aggregate.
    #[serde(default)]
    pub device_summary: BTreeMap<String, f64>,
    /// Timestamp of the reading merged most recently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_last_update: Option<String>,
    pub last_update: String,
}

impl GlobalView {
    /// An empty summary, used when the document does not exist yet.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: GLOBAL_VIEW_ID.to_string(),
            view_type: <Self as crate::ViewDocument>::KIND.to_string(),
            device_id: GLOBAL_VIEW_ID.to_string(),
            device_summary: BTreeMap::new(),
            device_last_update: None,
            last_update: format_timestamp(&now),
        }
    }

    /// Record `reading` as its device's last value.
    ///
    /// Idempotent per reading: merging the same reading again leaves the
    /// summary entry unchanged.
    pub fn merge(&mut self, reading: &Reading, now: DateTime<Utc>) {
        self.device_summary
            .insert(reading.device_id.clone(), reading.value);
        self.device_last_update = Some(reading.timestamp_string());
        self.last_update = format_timestamp(&now);
    }

    pub fn last_value(&self, device_id: &str) -> Option<f64> {
        self.device_summary.get(device_id).copied()
    }

    /// Every summary value has a JSON encoding.
    pub fn is_storable(&self) -> bool {
        self.device_summary.values().all(|v| v.is_finite())
    }
}
