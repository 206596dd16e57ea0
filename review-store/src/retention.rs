//! Fixed-interval retention sweeper.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::store::ReviewStore;

/// Spawns the hourly cleanup loop; returns its join handle.
///
/// Each tick deletes reviews whose `created_at` fell behind the retention
/// window. Sweep failures are logged and the loop keeps running.
pub fn spawn_retention_sweeper(
    store: ReviewStore,
    interval: Duration,
    retention: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would race process startup; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!("retention sweep start");
            if let Err(e) = store.cleanup_expired(Utc::now(), retention).await {
                warn!(error = %e, "retention sweep failed");
            }
        }
    })
}
