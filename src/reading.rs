//! Readings - the decoded form of one change-feed record.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error type for decoding raw change records.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The record is missing a field or has a field of the wrong type.
    #[error("malformed reading record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reading record has an empty deviceId")]
    EmptyDeviceId,

    #[error("reading record has an unparseable timestamp {value:?}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// One sensor reading. Immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Wire shape of a reading as written to the source collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    pub device_id: String,
    pub value: f64,
    pub timestamp: String,
}

impl Reading {
    pub fn new(device_id: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            value,
            timestamp,
        }
    }

    /// Decode a raw change record (`deviceId`, `value`, `timestamp`).
    ///
    /// Unknown fields are ignored, so records carrying store metadata
    /// decode fine. A timestamp without an offset is taken as UTC.
    pub fn from_record(record: &Value) -> Result<Self, DecodeError> {
        let raw = RawReading::deserialize(record)?;
        Self::try_from(raw)
    }

    /// The reading timestamp as stored in views (`YYYY-MM-DDTHH:MM:SSZ`).
    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    pub fn to_raw(&self) -> RawReading {
        RawReading {
            device_id: self.device_id.clone(),
            value: self.value,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

impl TryFrom<RawReading> for Reading {
    type Error = DecodeError;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        if raw.device_id.is_empty() {
            return Err(DecodeError::EmptyDeviceId);
        }
        let timestamp = parse_timestamp(&raw.timestamp)?;
        Ok(Reading {
            device_id: raw.device_id,
            value: raw.value,
            timestamp,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| DecodeError::InvalidTimestamp {
                value: value.to_string(),
                source: rfc_err,
            }),
    }
}

/// Render a timestamp the way views store it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn decodes_a_record() {
        let record = json!({
            "id": "f1b2",
            "deviceId": "007",
            "value": 42.0,
            "timestamp": "2024-01-01T00:00:00Z",
            "_etag": "\"0000\""
        });

        let reading = Reading::from_record(&record).unwrap();
        assert_eq!(reading.device_id, "007");
        assert_eq!(reading.value, 42.0);
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(reading.timestamp_string(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn converts_offsets_to_utc() {
        let record = json!({
            "deviceId": "001",
            "value": 1,
            "timestamp": "2024-01-01T02:30:00.123+02:00"
        });

        let reading = Reading::from_record(&record).unwrap();
        assert_eq!(reading.timestamp_string(), "2024-01-01T00:30:00Z");
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let record = json!({
            "deviceId": "001",
            "value": 1.5,
            "timestamp": "2024-06-30T23:59:59"
        });

        let reading = Reading::from_record(&record).unwrap();
        assert_eq!(reading.timestamp_string(), "2024-06-30T23:59:59Z");
    }

    #[test]
    fn rejects_empty_device_id() {
        let record = json!({"deviceId": "", "value": 1, "timestamp": "2024-01-01T00:00:00Z"});
        let err = Reading::from_record(&record).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyDeviceId));
    }

    #[test]
    fn rejects_missing_value() {
        let record = json!({"deviceId": "001", "timestamp": "2024-01-01T00:00:00Z"});
        let err = Reading::from_record(&record).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn rejects_non_numeric_value() {
        let record = json!({"deviceId": "001", "value": "high", "timestamp": "2024-01-01T00:00:00Z"});
        assert!(matches!(
            Reading::from_record(&record),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let record = json!({"deviceId": "001", "value": 1, "timestamp": "yesterday"});
        let err = Reading::from_record(&record).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidTimestamp { .. }));
    }

    #[test]
    fn raw_form_decodes_back() {
        let reading = Reading::new(
            "042",
            150.25,
            Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap(),
        );
        let record = serde_json::to_value(reading.to_raw()).unwrap();
        assert_eq!(record["deviceId"], "042");
        assert_eq!(Reading::from_record(&record).unwrap(), reading);
    }
}
