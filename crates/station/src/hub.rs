//! Live fan-out of the latest reading to every connected subscriber.
//!
//! Subscribers register a channel and receive the identical serialized
//! payload on every broadcast tick.  A subscriber whose channel has gone
//! away is dropped from the registry without affecting delivery to the
//! rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::reader::ReadCoordinator;

pub struct BroadcastHub {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a subscriber; returns its id and the receiving end of its
    /// payload channel.
    pub async fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subscribers.lock().await;
        subs.insert(id, tx);
        debug!(subscriber = id, total = subs.len(), "subscriber registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        let mut subs = self.subscribers.lock().await;
        if subs.remove(&id).is_some() {
            debug!(subscriber = id, total = subs.len(), "subscriber removed");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Push one payload to every live subscriber.  Subscribers whose
    /// channel is closed are pruned; the rest still receive this payload.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, payload: &str) -> usize {
        let mut subs = self.subscribers.lock().await;
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, tx) in subs.iter() {
            if tx.send(payload.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            subs.remove(&id);
            debug!(subscriber = id, "dropped dead subscriber");
        }

        delivered
    }

    /// One broadcast cycle: a single coordinated read, serialized once and
    /// fanned out on success.  On failure nothing is sent this tick: a
    /// blank tick, not a disconnect.
    pub async fn tick(&self, reader: &ReadCoordinator) {
        match reader.get_current().await {
            Ok(reading) => match serde_json::to_string(&reading) {
                Ok(payload) => {
                    self.broadcast(&payload).await;
                }
                Err(e) => warn!("live payload serialization failed: {e}"),
            },
            Err(e) => debug!("broadcast tick skipped: {e}"),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
