//! TTL cache over the OpenWeatherMap current-weather endpoint.
//!
//! The upstream is rate-limited, so consumers never talk to it directly:
//! a single mutable cell holds the last snapshot together with its expiry,
//! and the cell lock is held across the refresh.  Callers racing past an
//! expired TTL line up on the lock and find the fresh snapshot instead of
//! issuing their own fetch, so at most one fetch is ever in flight.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::OutdoorConfig;
use crate::error::FetchError;
use crate::sensor::now_unix;

// ---------------------------------------------------------------------------
// Snapshot shape
// ---------------------------------------------------------------------------

/// Outdoor conditions as served to consumers.  `heat_index` is the
/// upstream "feels like" figure passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutdoorSnapshot {
    /// Unix seconds, as reported by the upstream observation.
    pub time: i64,
    pub temp: f64,
    pub heat_index: f64,
    pub humidity: f64,
    pub pressure: f64,
    /// Cloud cover, percent.
    pub cloudiness: f64,
    /// Wind speed, m/s.
    pub wind: f64,
    /// Whether this response was answered from the cache.
    pub cached: bool,
    /// Seconds until the cache will refresh from upstream.
    pub next_update_seconds: i64,
}

// Upstream response, current-weather API (subset we consume).
#[derive(Debug, Deserialize)]
struct OwmResponse {
    #[serde(default = "default_cod")]
    cod: i64,
    dt: i64,
    main: OwmMain,
    clouds: OwmClouds,
    wind: OwmWind,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct OwmClouds {
    all: f64,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
}

fn default_cod() -> i64 {
    200
}

fn snapshot_from(r: OwmResponse) -> OutdoorSnapshot {
    OutdoorSnapshot {
        time: r.dt,
        temp: r.main.temp,
        heat_index: r.main.feels_like,
        humidity: r.main.humidity,
        pressure: r.main.pressure,
        cloudiness: r.clouds.all,
        wind: r.wind.speed,
        cached: false,
        next_update_seconds: 0,
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct Cached {
    expires_at: i64,
    snapshot: OutdoorSnapshot,
}

pub struct OutdoorCache {
    client: reqwest::Client,
    cfg: OutdoorConfig,
    cell: Mutex<Option<Cached>>,
}

impl OutdoorCache {
    pub fn new(cfg: OutdoorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
            cell: Mutex::new(None),
        }
    }

    /// Return the cached snapshot while it is fresh, otherwise refresh from
    /// upstream.  A failed refresh is surfaced as-is; the stale snapshot is
    /// deliberately not served as a fallback.
    pub async fn get(&self) -> Result<OutdoorSnapshot, FetchError> {
        self.get_at(now_unix()).await
    }

    async fn get_at(&self, now: i64) -> Result<OutdoorSnapshot, FetchError> {
        let mut cell = self.cell.lock().await;

        if let Some(c) = cell.as_ref() {
            if now < c.expires_at {
                let mut snap = c.snapshot.clone();
                snap.cached = true;
                snap.next_update_seconds = c.expires_at - now;
                return Ok(snap);
            }
        }

        let mut snap = self.fetch().await?;
        debug!(time = snap.time, "outdoor snapshot refreshed");

        *cell = Some(Cached {
            expires_at: now + self.cfg.cache_ttl_secs,
            snapshot: snap.clone(),
        });

        snap.cached = false;
        snap.next_update_seconds = self.cfg.cache_ttl_secs;
        Ok(snap)
    }

    async fn fetch(&self) -> Result<OutdoorSnapshot, FetchError> {
        let url = format!("{}/data/2.5/weather", self.cfg.base_url);
        let lat = self.cfg.lat.to_string();
        let lon = self.cfg.lon.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("appid", self.cfg.api_key.as_str()),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FetchError::UpstreamStatus(resp.status().as_u16() as i64));
        }

        let body: OwmResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        if body.cod != 200 {
            return Err(FetchError::UpstreamStatus(body.cod));
        }

        Ok(snapshot_from(body))
    }

    /// Place a snapshot directly into the cell.
    #[cfg(test)]
    async fn seed(&self, snapshot: OutdoorSnapshot, expires_at: i64) {
        let mut cell = self.cell.lock().await;
        *cell = Some(Cached {
            expires_at,
            snapshot,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
