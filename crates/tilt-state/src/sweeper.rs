//! Periodic reclamation of expired windows and counters.
//!
//! Reads already ignore expired state, so the sweeper only bounds memory for
//! devices and instances that went quiet and never wrote again.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::TelemetryStore;

pub struct ExpirySweeper {
    store: TelemetryStore,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: TelemetryStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run the sweep loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.store.purge_expired() {
                        warn!(error = %e, "expiry sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
