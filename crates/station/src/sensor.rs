//! Canonical reading shape and the sensor gateway trait.
//!
//! Raw sensor units are converted and rounded here, at the acquisition
//! boundary; nothing downstream (store, broadcast, API) touches the
//! numbers again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReadError;

#[cfg(feature = "bme280")]
pub mod bme280;
#[cfg(feature = "sim")]
pub mod sim;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// A single environmental reading, wire-ready: field names match the JSON
/// payload and the store columns, values rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Unix seconds.
    pub time: i64,
    /// Degrees Celsius.
    pub temp: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Hectopascal.
    pub pressure: f64,
}

/// Raw sensor output before stamping and rounding.  Produced only by a
/// sensor backend; a failed acquisition produces no measurement at all,
/// never a partial one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub pressure_hpa: f64,
}

impl Reading {
    /// Stamp a raw measurement with a unix timestamp, rounding every field.
    pub fn stamp(time: i64, m: Measurement) -> Self {
        Self {
            time,
            temp: round2(m.temperature_c),
            humidity: round2(m.humidity_pct),
            pressure: round2(m.pressure_hpa),
        }
    }
}

/// Round to two decimal places.  The epsilon counters binary representation
/// bias for values sitting just under a half-cent boundary; applying the
/// rounding twice yields the same result.
pub fn round2(x: f64) -> f64 {
    ((x + f64::EPSILON) * 100.0).round() / 100.0
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// A physical (or simulated) environmental sensor.
///
/// The device is a shared, non-reentrant resource: implementations are read
/// through the `ReadCoordinator` only, never directly by other components.
#[async_trait]
pub trait Sensor: Send + Sync {
    async fn read(&self) -> Result<Measurement, ReadError>;
}

// ===========================================================================
// Tests
// ===========================================================================
