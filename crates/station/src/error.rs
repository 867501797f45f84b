//! Error taxonomy for the telemetry pipeline.
//!
//! `InitError` is fatal: without a working sensor handle the process must
//! not come up and serve traffic.  Everything else is transient and is
//! surfaced to the specific caller that hit it; no periodic task ever dies
//! because a single read, append, or fetch failed.

use thiserror::Error;

/// One-time sensor initialization failure.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("i2c bus open failed: {0}")]
    Bus(String),
    #[error("no supported sensor at 0x{addr:02x} (chip id 0x{found:02x})")]
    UnknownChip { addr: u16, found: u8 },
}

/// Transient sensor read failure (bus error, timeout).
///
/// Cloneable so a shared in-flight read can hand the identical outcome to
/// every attached caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("sensor i/o failed: {0}")]
    Io(String),
    #[error("sensor read aborted before completion")]
    Aborted,
}

/// Time-series store failure.  Tolerated per tick on append; fatal only
/// when the store cannot be opened or migrated at startup.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// External weather source failure.  A stale cached snapshot is
/// deliberately never substituted for a failed refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("outdoor fetch failed: {0}")]
    Http(String),
    #[error("outdoor source returned status {0}")]
    UpstreamStatus(i64),
    #[error("outdoor payload malformed: {0}")]
    Decode(String),
}
