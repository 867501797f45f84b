//! Single-flight coordination of sensor reads.
//!
//! The device is shared and non-reentrant: no matter how many callers want
//! a current reading at once (HTTP request, live push tick, log tick), at
//! most one physical read is in flight.  Late callers attach to the pending
//! outcome, and every attached caller observes the identical result.  There
//! is no caching past the in-flight window: a call arriving after the slot
//! clears triggers a fresh hardware read.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::error::ReadError;
use crate::sensor::{now_unix, Reading, Sensor};

pub type ReadOutcome = Result<Reading, ReadError>;

#[derive(Clone)]
pub struct ReadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    sensor: Arc<dyn Sensor>,
    inflight: Mutex<Option<broadcast::Sender<ReadOutcome>>>,
}

impl ReadCoordinator {
    pub fn new(sensor: Arc<dyn Sensor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sensor,
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Obtain a current reading, attaching to an in-flight read if one
    /// exists.
    pub async fn get_current(&self) -> ReadOutcome {
        let mut rx = {
            let mut slot = self.inner.inflight.lock().await;
            match slot.as_ref() {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    *slot = Some(tx.clone());
                    let inner = Arc::clone(&self.inner);
                    // The read runs in its own task so a caller that goes
                    // away mid-read cannot abort it for the others.
                    tokio::spawn(async move {
                        let outcome = match inner.sensor.read().await {
                            Ok(m) => Ok(Reading::stamp(now_unix(), m)),
                            Err(e) => Err(e),
                        };
                        // Clear the slot before publishing: a caller
                        // arriving now must start a fresh read, not attach
                        // to a result it can no longer receive.
                        let mut slot = inner.inflight.lock().await;
                        *slot = None;
                        let _ = tx.send(outcome);
                    });
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReadError::Aborted),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
