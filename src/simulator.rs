//! Sensor simulator - the producer side of the pipeline.
//!
//! Writes synthetic readings for a range of devices into the source
//! collection at randomized intervals. Used by the demo binary and by
//! integration tests; it is not part of the view-maintenance engine.

use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::feed::{FeedError, ReadingSink};
use crate::reading::Reading;

const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(1250);
const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

/// Error type for the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulatorError {
    #[error("invalid sensor range {0:?}: expected N or N-M with 1 <= N <= M")]
    InvalidRange(String),

    #[error("writing reading for device {device_id} failed")]
    Write {
        device_id: String,
        #[source]
        source: FeedError,
    },
}

/// Inclusive range of simulated sensor numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorRange {
    pub first: u32,
    pub last: u32,
}

impl SensorRange {
    /// Parse `"M"` (sensors 1 to M) or `"N-M"` (sensors N to M).
    pub fn parse(input: &str) -> Result<Self, SimulatorError> {
        let invalid = || SimulatorError::InvalidRange(input.to_string());
        let parse_one = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid());

        let (first, last) = match input.split_once('-') {
            Some((start, end)) => (parse_one(start)?, parse_one(end)?),
            None => (1, parse_one(input)?),
        };

        if first == 0 || last < first {
            return Err(invalid());
        }
        Ok(Self { first, last })
    }

    pub fn sensors(&self) -> RangeInclusive<u32> {
        self.first..=self.last
    }

    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

impl FromStr for SensorRange {
    type Err = SimulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Device id for a sensor number, zero-padded to three digits (`7` -> `"007"`).
pub fn device_id(sensor: u32) -> String {
    format!("{:03}", sensor)
}

/// Statistics from one or more simulated sensors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulatorStats {
    pub written: usize,
    pub throttled: usize,
    /// Readings abandoned after exhausting the write attempts.
    pub dropped: usize,
}

impl SimulatorStats {
    fn merge(&mut self, other: SimulatorStats) {
        self.written += other.written;
        self.throttled += other.throttled;
        self.dropped += other.dropped;
    }
}

/// Writes synthetic readings with values in `[100, 200)`.
pub struct SensorSimulator<K> {
    sink: Arc<K>,
    min_interval: Duration,
    max_interval: Duration,
    max_write_attempts: u32,
    seed: Option<u64>,
}

impl<K> Clone for SensorSimulator<K> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            max_write_attempts: self.max_write_attempts,
            seed: self.seed,
        }
    }
}

impl<K: ReadingSink + 'static> SensorSimulator<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink: Arc::new(sink),
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            seed: None,
        }
    }

    /// Pause between readings, drawn uniformly from `[min, max]`.
    pub fn with_interval(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = min.min(max);
        self.max_interval = max.max(min);
        self
    }

    /// Deterministic values and intervals; each sensor derives its own stream.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Simulate one sensor until `stop` turns true.
    pub async fn run(
        &self,
        sensor: u32,
        mut stop: watch::Receiver<bool>,
    ) -> Result<SimulatorStats, SimulatorError> {
        let device_id = device_id(sensor);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ u64::from(sensor)),
            None => StdRng::from_entropy(),
        };
        let mut stats = SimulatorStats::default();

        while !*stop.borrow() {
            let reading = Reading::new(&device_id, 100.0 + rng.gen::<f64>() * 100.0, Utc::now());
            debug!(device_id = %reading.device_id, value = reading.value, "sensor reading");
            self.write(&reading, &mut stats).await?;

            let pause = rng.gen_range(self.min_interval..=self.max_interval);
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        Ok(stats)
    }

    /// Simulate every sensor in `range` concurrently until `stop` turns true.
    pub async fn run_range(
        &self,
        range: SensorRange,
        stop: watch::Receiver<bool>,
    ) -> Result<SimulatorStats, SimulatorError> {
        let mut tasks = JoinSet::new();
        for sensor in range.sensors() {
            let simulator = self.clone();
            let stop = stop.clone();
            tasks.spawn(async move { simulator.run(sensor, stop).await });
        }

        let mut total = SimulatorStats::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(stats)) => total.merge(stats),
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => warn!(error = %join_err, "sensor task did not complete"),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }

    async fn write(
        &self,
        reading: &Reading,
        stats: &mut SimulatorStats,
    ) -> Result<(), SimulatorError> {
        let record = serde_json::to_value(reading.to_raw()).map_err(|e| SimulatorError::Write {
            device_id: reading.device_id.clone(),
            source: FeedError::Unavailable(e.to_string()),
        })?;

        for attempt in 1..=self.max_write_attempts {
            match self.sink.create(record.clone()).await {
                Ok(()) => {
                    stats.written += 1;
                    return Ok(());
                }
                Err(FeedError::Throttled { retry_after }) => {
                    stats.throttled += 1;
                    warn!(
                        device_id = %reading.device_id,
                        attempt,
                        delay_ms = retry_after.as_millis() as u64,
                        "write throttled, waiting"
                    );
                    if attempt < self.max_write_attempts {
                        tokio::time::sleep(retry_after).await;
                    }
                }
                Err(source) => {
                    return Err(SimulatorError::Write {
                        device_id: reading.device_id.clone(),
                        source,
                    })
                }
            }
        }

        stats.dropped += 1;
        warn!(
            device_id = %reading.device_id,
            attempts = self.max_write_attempts,
            "dropping reading after repeated throttling"
        );
        Ok(())
    }
}
