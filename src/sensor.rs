//! Temperature/humidity sensor boundary.
//!
//! The node only needs "read current temperature and humidity"; everything
//! else here is derived from a [`Reading`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{SensorConfig, SensorKind};

/// Operating range of the DHT sensor family.
const TEMPERATURE_RANGE_C: std::ops::RangeInclusive<f32> = -40.0..=80.0;
const HUMIDITY_RANGE_PCT: std::ops::RangeInclusive<f32> = 0.0..=100.0;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed sensor data: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reading out of range: {temperature_c}°C, {humidity_pct}%")]
    OutOfRange { temperature_c: f32, humidity_pct: f32 },

    #[error("sensor returned no data")]
    NoData,
}

/// A single temperature/humidity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub taken_at: DateTime<Utc>,
}

impl Reading {
    /// Build a reading, rejecting NaN and values the sensor cannot report.
    pub fn new(temperature_c: f32, humidity_pct: f32) -> Result<Self, SensorError> {
        if !TEMPERATURE_RANGE_C.contains(&temperature_c) || !HUMIDITY_RANGE_PCT.contains(&humidity_pct)
        {
            return Err(SensorError::OutOfRange {
                temperature_c,
                humidity_pct,
            });
        }
        Ok(Self {
            temperature_c,
            humidity_pct,
            taken_at: Utc::now(),
        })
    }

    pub fn heat_index_c(&self) -> f32 {
        heat_index_c(self.temperature_c, self.humidity_pct)
    }
}

/// Apparent temperature in °C.
///
/// Steadman's simple formula below 80 °F, otherwise the Rothfusz regression
/// with the NWS low- and high-humidity adjustments. Computed in °F.
pub fn heat_index_c(temperature_c: f32, humidity_pct: f32) -> f32 {
    let t = temperature_c * 1.8 + 32.0;
    let rh = humidity_pct;

    let mut hi = 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + rh * 0.094);

    if hi > 79.0 {
        hi = -42.379 + 2.049_015_2 * t + 10.143_331 * rh
            - 0.224_755_41 * t * rh
            - 0.006_837_83 * t * t
            - 0.054_817_17 * rh * rh
            + 0.001_228_74 * t * t * rh
            + 0.000_852_82 * t * rh * rh
            - 0.000_001_99 * t * t * rh * rh;

        if rh < 13.0 && (80.0..=112.0).contains(&t) {
            hi -= ((13.0 - rh) * 0.25) * ((17.0 - (t - 95.0).abs()) * 0.058_82).sqrt();
        } else if rh > 85.0 && (80.0..=87.0).contains(&t) {
            hi += ((rh - 85.0) * 0.1) * ((87.0 - t) * 0.2);
        }
    }

    (hi - 32.0) / 1.8
}

/// Anything that can produce a [`Reading`] on demand.
pub trait Sensor {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

/// Deterministic stand-in for a physical sensor.
///
/// Values drift slowly around a mild indoor climate so consecutive cycles
/// publish different numbers.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensor {
    reads: u32,
    fail_every: Option<u32>,
}

impl SimulatedSensor {
    pub fn new(fail_every: Option<u32>) -> Self {
        Self {
            reads: 0,
            fail_every: fail_every.filter(|n| *n > 0),
        }
    }
}

impl Sensor for SimulatedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.reads = self.reads.wrapping_add(1);
        if let Some(n) = self.fail_every {
            if self.reads % n == 0 {
                return Err(SensorError::NoData);
            }
        }
        let phase = self.reads as f32 * 0.1;
        Reading::new(21.0 + 3.0 * phase.sin(), 55.0 + 10.0 * phase.cos())
    }
}

#[derive(Debug, Deserialize)]
struct FileReading {
    temperature: f32,
    humidity: f32,
}

/// Reads `{"temperature": .., "humidity": ..}` from a file on every call.
///
/// Useful when another process owns the physical sensor.
#[derive(Debug, Clone)]
pub struct FileSensor {
    path: PathBuf,
}

impl FileSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sensor for FileSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Err(SensorError::NoData);
        }
        let raw: FileReading = serde_json::from_str(&contents)?;
        Reading::new(raw.temperature, raw.humidity)
    }
}

/// The sensor selected in the configuration.
pub enum ConfiguredSensor {
    Simulated(SimulatedSensor),
    File(FileSensor),
}

impl ConfiguredSensor {
    pub fn from_config(config: &SensorConfig) -> Self {
        match (config.kind, &config.path) {
            (SensorKind::File, Some(path)) => ConfiguredSensor::File(FileSensor::new(path.clone())),
            _ => ConfiguredSensor::Simulated(SimulatedSensor::new(config.fail_every)),
        }
    }
}

impl Sensor for ConfiguredSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        match self {
            ConfiguredSensor::Simulated(sensor) => sensor.read(),
            ConfiguredSensor::File(sensor) => sensor.read(),
        }
    }
}
