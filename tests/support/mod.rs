//! Shared helpers for the integration suites.

#![allow(dead_code)]

pub mod faulty_store;

use chrono::{DateTime, TimeZone, Utc};
use sensor_views::Reading;
use serde_json::{json, Value};

pub use faulty_store::FaultyStore;

/// Fixed instant `second` seconds into 2024-01-01, UTC.
pub fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap()
}

pub fn reading(device_id: &str, value: f64, second: u32) -> Reading {
    Reading::new(device_id, value, at(second))
}

/// A raw source record as a producer writes it.
pub fn record(device_id: &str, value: f64, second: u32) -> Value {
    json!({
        "deviceId": device_id,
        "value": value,
        "timestamp": format!("2024-01-01T00:00:{:02}Z", second),
    })
}
