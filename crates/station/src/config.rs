//! TOML config file loading and validation.
//!
//! Everything except the outdoor credentials has a sensible default, so a
//! minimal config file only carries the `[outdoor]` section.  `DB_URL` and
//! `WEB_PORT` may be overridden from the environment at startup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::db::DEFAULT_RETENTION_SECS;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    pub outdoor: OutdoorConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// I2C bus number (1 on every recent Raspberry Pi).
    pub i2c_bus: u8,
    /// BME280 slave address: 0x76 (SDO low) or 0x77 (SDO high).
    pub i2c_addr: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_url: String,
    pub retention_secs: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Wall-clock-aligned logging interval, minutes.
    pub log_interval_min: i64,
    /// Live push interval, milliseconds.
    pub broadcast_interval_ms: u64,
    /// Delay before the first live push after startup, milliseconds.
    pub broadcast_start_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutdoorConfig {
    pub api_key: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: i64,
    #[serde(default = "default_owm_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Valid BME280 slave addresses (SDO pin low/high).
const VALID_I2C_ADDRS: &[u16] = &[0x76, 0x77];

fn default_cache_ttl() -> i64 {
    300
}

fn default_owm_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            i2c_addr: 0x76,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite:weather.db?mode=rwc".to_string(),
            retention_secs: DEFAULT_RETENTION_SECS,
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            log_interval_min: 5,
            broadcast_interval_ms: 2000,
            broadcast_start_delay_ms: 1000,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 65069 }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries.  Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // ── Sensor ──────────────────────────────────────────────
        if !VALID_I2C_ADDRS.contains(&self.sensor.i2c_addr) {
            errors.push(format!(
                "sensor: i2c_addr 0x{:02x} is not a BME280 address (allowed: 0x76, 0x77)",
                self.sensor.i2c_addr
            ));
        }

        // ── Storage ─────────────────────────────────────────────
        if self.storage.db_url.trim().is_empty() {
            errors.push("storage: db_url is empty".to_string());
        }
        if self.storage.retention_secs <= 0 {
            errors.push(format!(
                "storage: retention_secs must be positive, got {}",
                self.storage.retention_secs
            ));
        }

        // ── Cadence ─────────────────────────────────────────────
        if !(1..=60).contains(&self.cadence.log_interval_min) {
            errors.push(format!(
                "cadence: log_interval_min {} out of range [1, 60]",
                self.cadence.log_interval_min
            ));
        }
        if self.cadence.broadcast_interval_ms < 100 {
            errors.push(format!(
                "cadence: broadcast_interval_ms must be at least 100, got {}",
                self.cadence.broadcast_interval_ms
            ));
        }

        // ── Outdoor ─────────────────────────────────────────────
        if self.outdoor.api_key.trim().is_empty() {
            errors.push("outdoor: api_key is empty".to_string());
        }
        if !(-90.0..=90.0).contains(&self.outdoor.lat) {
            errors.push(format!(
                "outdoor: lat {} out of range [-90, 90]",
                self.outdoor.lat
            ));
        }
        if !(-180.0..=180.0).contains(&self.outdoor.lon) {
            errors.push(format!(
                "outdoor: lon {} out of range [-180, 180]",
                self.outdoor.lon
            ));
        }
        if self.outdoor.cache_ttl_secs <= 0 {
            errors.push(format!(
                "outdoor: cache_ttl_secs must be positive, got {}",
                self.outdoor.cache_ttl_secs
            ));
        }
        if self.outdoor.base_url.trim().is_empty() {
            errors.push("outdoor: base_url is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            sensor: SensorConfig::default(),
            storage: StorageConfig::default(),
            cadence: CadenceConfig::default(),
            outdoor: OutdoorConfig {
                api_key: "k".into(),
                lat: 48.2,
                lon: 16.37,
                cache_ttl_secs: 300,
                base_url: default_owm_base_url(),
            },
            web: WebConfig::default(),
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing --------------------------------------------------------------

    #[test]
    fn parse_minimal_config_applies_defaults() {
        let toml_str = r#"
[outdoor]
api_key = "secret"
lat = 48.2
lon = 16.37
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sensor.i2c_bus, 1);
        assert_eq!(config.sensor.i2c_addr, 0x76);
        assert_eq!(config.storage.retention_secs, 259_200);
        assert_eq!(config.cadence.log_interval_min, 5);
        assert_eq!(config.cadence.broadcast_interval_ms, 2000);
        assert_eq!(config.cadence.broadcast_start_delay_ms, 1000);
        assert_eq!(config.outdoor.cache_ttl_secs, 300);
        assert_eq!(config.web.port, 65069);
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[sensor]
i2c_bus = 0
i2c_addr = 0x77

[storage]
db_url = "sqlite:/var/lib/weather/data.db?mode=rwc"
retention_secs = 86400

[cadence]
log_interval_min = 10
broadcast_interval_ms = 5000
broadcast_start_delay_ms = 500

[outdoor]
api_key = "secret"
lat = -33.86
lon = 151.2
cache_ttl_secs = 600
base_url = "http://localhost:8123"

[web]
port = 8080
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sensor.i2c_addr, 0x77);
        assert_eq!(config.storage.retention_secs, 86400);
        assert_eq!(config.cadence.log_interval_min, 10);
        assert_eq!(config.outdoor.base_url, "http://localhost:8123");
        assert_eq!(config.web.port, 8080);
        config.validate().unwrap();
    }

    #[test]
    fn parse_missing_outdoor_section_fails() {
        assert!(toml::from_str::<Config>("").is_err());
    }

    // -- Validation -----------------------------------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn bad_i2c_addr_rejected() {
        let mut cfg = valid_config();
        cfg.sensor.i2c_addr = 0x48;
        assert_validation_err(&cfg, "not a BME280 address");
    }

    #[test]
    fn empty_db_url_rejected() {
        let mut cfg = valid_config();
        cfg.storage.db_url = " ".into();
        assert_validation_err(&cfg, "db_url is empty");
    }

    #[test]
    fn nonpositive_retention_rejected() {
        let mut cfg = valid_config();
        cfg.storage.retention_secs = 0;
        assert_validation_err(&cfg, "retention_secs must be positive");
    }

    #[test]
    fn log_interval_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.cadence.log_interval_min = 0;
        assert_validation_err(&cfg, "log_interval_min");

        let mut cfg = valid_config();
        cfg.cadence.log_interval_min = 61;
        assert_validation_err(&cfg, "log_interval_min");
    }

    #[test]
    fn too_fast_broadcast_rejected() {
        let mut cfg = valid_config();
        cfg.cadence.broadcast_interval_ms = 50;
        assert_validation_err(&cfg, "broadcast_interval_ms");
    }

    #[test]
    fn empty_api_key_rejected() {
        let mut cfg = valid_config();
        cfg.outdoor.api_key = "".into();
        assert_validation_err(&cfg, "api_key is empty");
    }

    #[test]
    fn latitude_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.outdoor.lat = 90.5;
        assert_validation_err(&cfg, "lat 90.5 out of range");
    }

    #[test]
    fn longitude_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.outdoor.lon = -181.0;
        assert_validation_err(&cfg, "lon -181 out of range");
    }

    #[test]
    fn nonpositive_ttl_rejected() {
        let mut cfg = valid_config();
        cfg.outdoor.cache_ttl_secs = 0;
        assert_validation_err(&cfg, "cache_ttl_secs must be positive");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.sensor.i2c_addr = 0;
        cfg.storage.retention_secs = -1;
        cfg.outdoor.api_key = "".into();
        cfg.outdoor.lat = 99.0;

        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("not a BME280 address"), "missing addr error in: {msg}");
        assert!(msg.contains("retention_secs"), "missing retention error in: {msg}");
        assert!(msg.contains("api_key is empty"), "missing api_key error in: {msg}");
        assert!(msg.contains("lat 99 out of range"), "missing lat error in: {msg}");
    }
}
