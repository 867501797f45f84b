//! Periodic acquisition: a wall-clock-aligned log tick persisting into the
//! bounded store, and a fixed-interval broadcast tick feeding live viewers.
//!
//! The two cadences are independent; neither needs overlap protection
//! because every read funnels through the coordinator's single-flight slot
//! and each tick is idempotent.  Shutdown is observed between ticks only;
//! a tick that has started runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::db::Db;
use crate::hub::BroadcastHub;
use crate::reader::ReadCoordinator;
use crate::sensor::now_unix;

/// Seconds until the next wall-clock boundary of `interval_secs`
/// (boundaries are multiples of the interval since the epoch).  Landing
/// exactly on a boundary waits a full interval, so a tick never fires
/// twice.
fn secs_until_boundary(now: i64, interval_secs: i64) -> i64 {
    interval_secs - now.rem_euclid(interval_secs)
}

/// One log tick: read through the coordinator, then prune + append in a
/// single transaction.  A failed read still prunes so retention holds
/// across sensor outages; a failed append is logged and skipped, never
/// retried.  The next tick simply logs the next point.
pub async fn log_tick(reader: &ReadCoordinator, db: &Db) {
    let now = now_unix();
    match reader.get_current().await {
        Ok(reading) => match db.prune_and_append(now, &reading).await {
            Ok(removed) => debug!(time = reading.time, removed, "sample logged"),
            Err(e) => error!("log tick: append failed: {e}"),
        },
        Err(e) => {
            warn!("log tick: sensor read failed: {e}");
            if let Err(e) = db.prune(now).await {
                error!("log tick: prune failed: {e}");
            }
        }
    }
}

/// Run log ticks until shutdown.  Intended to be `tokio::spawn`-ed from
/// main.
pub async fn run_log_ticks(
    reader: ReadCoordinator,
    db: Db,
    interval_min: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval_secs = interval_min * 60;
    info!(interval_min, "log scheduler started");

    loop {
        let wait = secs_until_boundary(now_unix(), interval_secs);
        tokio::select! {
            _ = sleep(Duration::from_secs(wait as u64)) => log_tick(&reader, &db).await,
            _ = shutdown.changed() => {
                info!("log scheduler stopped");
                return;
            }
        }
    }
}

/// Run broadcast ticks until shutdown.  The first tick is held back
/// briefly so live pushes don't pile onto a sensor that just finished
/// initializing.
pub async fn run_broadcast_ticks(
    reader: ReadCoordinator,
    hub: Arc<BroadcastHub>,
    interval_ms: u64,
    start_delay_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = sleep(Duration::from_millis(start_delay_ms)) => {}
        _ = shutdown.changed() => return,
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    info!(interval_ms, "broadcast scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => hub.tick(&reader).await,
            _ = shutdown.changed() => {
                info!("broadcast scheduler stopped");
                return;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
