//! Pipeline composition root.
//!
//! Every long-lived handle is a field here and is injected where needed;
//! nothing lives in module-level globals.  Constructed once at startup and
//! torn down explicitly on shutdown.

use std::sync::Arc;

use tokio::sync::watch;

use crate::db::Db;
use crate::hub::BroadcastHub;
use crate::outdoor::OutdoorCache;
use crate::reader::ReadCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub reader: ReadCoordinator,
    pub outdoor: Arc<OutdoorCache>,
    pub hub: Arc<BroadcastHub>,
    /// Flips to true once when the process begins draining.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        db: Db,
        reader: ReadCoordinator,
        outdoor: Arc<OutdoorCache>,
        hub: Arc<BroadcastHub>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            reader,
            outdoor,
            hub,
            shutdown,
        }
    }
}
