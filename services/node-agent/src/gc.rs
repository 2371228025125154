//! Background reclaim loop for the image cache.
//!
//! Runs a reclaim pass whenever the interval ticks or someone kicks the
//! trigger (after admitting or releasing an image), as long as the cache is
//! over capacity. Failures are logged and retried on the next wakeup.

use std::sync::Arc;
use std::time::Duration;

use fnagent_image_cache::{CacheError, Reclaimer};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// Run the reclaim loop until shutdown.
pub async fn run_reclaim_loop(
    reclaimer: Arc<Reclaimer>,
    trigger: Arc<Notify>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        max_size = ?reclaimer.cache().max_size(),
        "Starting image reclaim loop"
    );

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {}
            _ = trigger.notified() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Reclaim loop shutting down");
                    break;
                }
                continue;
            }
        }

        if !reclaimer.cache().over_capacity().await {
            continue;
        }

        match reclaimer.reclaim().await {
            Ok(report) => {
                consecutive_failures = 0;
                debug!(
                    evicted = report.evicted.len(),
                    freed = report.freed_bytes,
                    total_size = report.total_size_bytes,
                    "Cache back within capacity"
                );
            }
            Err(CacheError::CapacityUnavailable {
                total_size_bytes,
                max_size_bytes,
                ..
            }) => {
                // Soft limit: keep running over budget until images are released.
                warn!(
                    total_size = total_size_bytes,
                    max_size = max_size_bytes,
                    "Image cache over capacity, all remaining images in use"
                );
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    warn!(error = %e, consecutive_failures, "Reclaim pass failed");
                } else {
                    error!(error = %e, consecutive_failures, "Reclaim pass failed repeatedly");
                }
            }
        }
    }
}
