//! Simulated indoor climate sensor for development machines without the
//! hardware attached.
//!
//! Each channel evolves as a random walk with mean reversion, so consecutive
//! readings are temporally coherent instead of white noise, plus a small
//! per-read electronic noise term.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ReadError;
use crate::sensor::{Measurement, Sensor};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Per-channel state
// ---------------------------------------------------------------------------

struct Channel {
    /// Current "true" value.  Evolves each tick.
    value: f64,
    /// Value the walk is pulled back toward.
    center: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    /// Per-read electronic noise sigma.
    noise_sigma: f64,
    min: f64,
    max: f64,
}

impl Channel {
    fn new(center: f64, walk_sigma: f64, noise_sigma: f64, min: f64, max: f64) -> Self {
        Self {
            value: center + gaussian(0.0, walk_sigma * 3.0),
            center,
            walk_sigma,
            mean_reversion: 0.02,
            noise_sigma,
            min,
            max,
        }
    }

    /// Evolve the base value one step and return an instantaneous reading.
    fn step(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.value);
        let walk = gaussian(0.0, self.walk_sigma);
        self.value = (self.value + pull + walk).clamp(self.min, self.max);

        (self.value + gaussian(0.0, self.noise_sigma)).clamp(self.min, self.max)
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Stateful simulator producing plausible indoor readings.
pub struct SimSensor {
    // temperature, humidity, pressure
    channels: Mutex<[Channel; 3]>,
}

impl SimSensor {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new([
                // Living-room temperature in °C.
                Channel::new(21.5, 0.06, 0.04, 5.0, 35.0),
                // Relative humidity in %.
                Channel::new(45.0, 0.35, 0.25, 10.0, 95.0),
                // Barometric pressure in hPa.
                Channel::new(1013.2, 0.12, 0.05, 950.0, 1060.0),
            ]),
        }
    }
}

impl Default for SimSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sensor for SimSensor {
    async fn read(&self) -> Result<Measurement, ReadError> {
        let mut ch = self.channels.lock().await;
        Ok(Measurement {
            temperature_c: ch[0].step(),
            humidity_pct: ch[1].step(),
            pressure_hpa: ch[2].step(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
