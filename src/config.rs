//! Configuration for the store, the change feed and the view processor.
//!
//! Every struct has sensible defaults and can be loaded from the process
//! environment with `from_env()`, or from any key lookup with
//! `from_env_with()` for tests.

use std::time::Duration;

use thiserror::Error;

pub const ENV_DATABASE_NAME: &str = "DatabaseName";
pub const ENV_VIEW_COLLECTION_NAME: &str = "ViewCollectionName";
pub const ENV_RAW_COLLECTION_NAME: &str = "RawCollectionName";
pub const ENV_FEED_POLL_DELAY: &str = "FeedPollDelay";
pub const ENV_FEED_MAX_BATCH_SIZE: &str = "FeedMaxBatchSize";
pub const ENV_DEVICE_VIEW_MAX_ATTEMPTS: &str = "DeviceViewMaxAttempts";
pub const ENV_GLOBAL_VIEW_MAX_ATTEMPTS: &str = "GlobalViewMaxAttempts";
pub const ENV_MAX_IN_FLIGHT_READINGS: &str = "MaxInFlightReadings";

const DEFAULT_DATABASE_NAME: &str = "sensors";
const DEFAULT_VIEW_COLLECTION_NAME: &str = "views";
const DEFAULT_RAW_COLLECTION_NAME: &str = "rawdata";
const DEFAULT_FEED_POLL_DELAY_MS: u64 = 1000;
const DEFAULT_FEED_MAX_BATCH_SIZE: u64 = 100;
pub const DEFAULT_DEVICE_VIEW_MAX_ATTEMPTS: u64 = 3;
pub const DEFAULT_GLOBAL_VIEW_MAX_ATTEMPTS: u64 = 10;

/// Error type for configuration loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    NotPositive { key: &'static str, value: String },

    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

/// Where the view documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database: String,
    pub view_collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE_NAME.to_string(),
            view_collection: DEFAULT_VIEW_COLLECTION_NAME.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database: parse_name(&get_env, ENV_DATABASE_NAME, DEFAULT_DATABASE_NAME)?,
            view_collection: parse_name(
                &get_env,
                ENV_VIEW_COLLECTION_NAME,
                DEFAULT_VIEW_COLLECTION_NAME,
            )?,
        })
    }
}

/// How the source collection's change feed is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub raw_collection: String,
    pub poll_delay: Duration,
    pub max_batch_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            raw_collection: DEFAULT_RAW_COLLECTION_NAME.to_string(),
            poll_delay: Duration::from_millis(DEFAULT_FEED_POLL_DELAY_MS),
            max_batch_size: DEFAULT_FEED_MAX_BATCH_SIZE as usize,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            raw_collection: parse_name(
                &get_env,
                ENV_RAW_COLLECTION_NAME,
                DEFAULT_RAW_COLLECTION_NAME,
            )?,
            poll_delay: Duration::from_millis(parse_positive(
                &get_env,
                ENV_FEED_POLL_DELAY,
                DEFAULT_FEED_POLL_DELAY_MS,
            )?),
            max_batch_size: parse_positive(
                &get_env,
                ENV_FEED_MAX_BATCH_SIZE,
                DEFAULT_FEED_MAX_BATCH_SIZE,
            )? as usize,
        })
    }
}

/// Retry budgets and fan-out bound for the view processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Total attempts for one device-view update (throttling only).
    pub device_max_attempts: u32,
    /// Total attempts for one global-view update, shared between
    /// concurrency conflicts and throttling.
    pub global_max_attempts: u32,
    /// Upper bound on readings processed at once within a batch.
    /// `None` means every reading in the batch runs concurrently.
    pub max_in_flight: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            device_max_attempts: DEFAULT_DEVICE_VIEW_MAX_ATTEMPTS as u32,
            global_max_attempts: DEFAULT_GLOBAL_VIEW_MAX_ATTEMPTS as u32,
            max_in_flight: None,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device_max_attempts = parse_positive(
            &get_env,
            ENV_DEVICE_VIEW_MAX_ATTEMPTS,
            DEFAULT_DEVICE_VIEW_MAX_ATTEMPTS,
        )?;
        let global_max_attempts = parse_positive(
            &get_env,
            ENV_GLOBAL_VIEW_MAX_ATTEMPTS,
            DEFAULT_GLOBAL_VIEW_MAX_ATTEMPTS,
        )?;
        let max_in_flight = match get_env(ENV_MAX_IN_FLIGHT_READINGS) {
            Some(_) => Some(parse_positive(&get_env, ENV_MAX_IN_FLIGHT_READINGS, 1)? as usize),
            None => None,
        };

        Ok(Self {
            device_max_attempts: to_attempts(ENV_DEVICE_VIEW_MAX_ATTEMPTS, device_max_attempts)?,
            global_max_attempts: to_attempts(ENV_GLOBAL_VIEW_MAX_ATTEMPTS, global_max_attempts)?,
            max_in_flight,
        })
    }
}

fn parse_name<F>(get_env: &F, key: &'static str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty { key }),
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default.to_string()),
    }
}

fn parse_positive<F>(get_env: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::NotPositive { key, value: raw }),
    }
}

fn to_attempts(key: &'static str, value: u64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| ConfigError::NotPositive {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let store = StoreConfig::from_env_with(env(&[])).unwrap();
        assert_eq!(store, StoreConfig::default());

        let feed = FeedConfig::from_env_with(env(&[])).unwrap();
        assert_eq!(feed.poll_delay, Duration::from_millis(1000));
        assert_eq!(feed.max_batch_size, 100);

        let processor = ProcessorConfig::from_env_with(env(&[])).unwrap();
        assert_eq!(processor.device_max_attempts, 3);
        assert_eq!(processor.global_max_attempts, 10);
        assert_eq!(processor.max_in_flight, None);
    }

    #[test]
    fn reads_values_from_env() {
        let lookup = env(&[
            (ENV_DATABASE_NAME, "poc"),
            (ENV_VIEW_COLLECTION_NAME, "view"),
            (ENV_RAW_COLLECTION_NAME, "raw"),
            (ENV_FEED_POLL_DELAY, "250"),
            (ENV_GLOBAL_VIEW_MAX_ATTEMPTS, "20"),
            (ENV_MAX_IN_FLIGHT_READINGS, "8"),
        ]);

        let store = StoreConfig::from_env_with(&lookup).unwrap();
        assert_eq!(store.database, "poc");
        assert_eq!(store.view_collection, "view");

        let feed = FeedConfig::from_env_with(&lookup).unwrap();
        assert_eq!(feed.raw_collection, "raw");
        assert_eq!(feed.poll_delay, Duration::from_millis(250));

        let processor = ProcessorConfig::from_env_with(&lookup).unwrap();
        assert_eq!(processor.global_max_attempts, 20);
        assert_eq!(processor.max_in_flight, Some(8));
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = FeedConfig::from_env_with(env(&[(ENV_FEED_POLL_DELAY, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotPositive {
                key: ENV_FEED_POLL_DELAY,
                value: "0".into()
            }
        );

        let err = ProcessorConfig::from_env_with(env(&[(ENV_DEVICE_VIEW_MAX_ATTEMPTS, "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotPositive { .. }));

        let err = ProcessorConfig::from_env_with(env(&[(ENV_MAX_IN_FLIGHT_READINGS, "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotPositive { .. }));
    }

    #[test]
    fn rejects_blank_names() {
        let err = StoreConfig::from_env_with(env(&[(ENV_DATABASE_NAME, "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty { key: ENV_DATABASE_NAME });
    }
}
