//! Reclaim passes: evict unpinned images until the cache fits its capacity.
//!
//! Candidates are chosen and reserved under the cache lock, the runtime
//! removes the image with the lock released, and the entry is dropped
//! afterwards. A reserved entry cannot be pinned. A removal failure ends the
//! pass, releases the reservation and leaves the entry cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::ImageEntry;
use crate::error::CacheError;
use crate::store::ImageCache;

/// Physically deletes cached image data from the container runtime.
#[async_trait]
pub trait ImageRemover: Send + Sync {
    /// Remove the image backing `entry`.
    async fn remove_image(&self, entry: &ImageEntry) -> anyhow::Result<()>;
}

/// Outcome of a reclaim pass that left the cache within capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Identities evicted during the pass, in eviction order.
    pub evicted: Vec<String>,
    /// Bytes freed.
    pub freed_bytes: u64,
    /// Cache size when the pass finished.
    pub total_size_bytes: u64,
}

/// Eviction driver bound to one cache and one removal action.
pub struct Reclaimer {
    cache: Arc<ImageCache>,
    remover: Arc<dyn ImageRemover>,
    removal_timeout: Option<Duration>,
    /// Serializes passes so two never pick the same candidate.
    pass_lock: Mutex<()>,
}

impl Reclaimer {
    pub fn new(cache: Arc<ImageCache>, remover: Arc<dyn ImageRemover>) -> Self {
        Self {
            cache,
            remover,
            removal_timeout: None,
            pass_lock: Mutex::new(()),
        }
    }

    /// Treat removals that take longer than `timeout` as failed.
    pub fn with_removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = Some(timeout);
        self
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Run one reclaim pass.
    ///
    /// Returns [`CacheError::RemovalFailed`] if the runtime could not remove
    /// the chosen image, and [`CacheError::CapacityUnavailable`] if only
    /// pinned images remain while the cache is still over capacity.
    pub async fn reclaim(&self) -> Result<ReclaimReport, CacheError> {
        let _pass = self.pass_lock.lock().await;
        let mut report = ReclaimReport::default();

        while self.cache.over_capacity().await {
            let Some(snapshot) = self.cache.evictable().await.into_iter().next() else {
                let total_size_bytes = self.cache.total_size().await;
                warn!(
                    total_size = total_size_bytes,
                    freed = report.freed_bytes,
                    "Cache over capacity but every image is pinned"
                );
                return Err(CacheError::CapacityUnavailable {
                    total_size_bytes,
                    max_size_bytes: self.cache.max_size().unwrap_or(u64::MAX),
                    freed_bytes: report.freed_bytes,
                });
            };

            // The snapshot is already stale; skip images pinned or removed since.
            let Some(candidate) = self.cache.begin_eviction(snapshot.identity()).await else {
                debug!(digest = %snapshot.identity(), "Eviction candidate changed, rescanning");
                continue;
            };
            let reservation = Reservation::new(self.cache.clone(), candidate.identity());

            if let Err(source) = self.remove_image(&candidate).await {
                reservation.release().await;
                self.cache.record_removal_failure();
                warn!(
                    digest = %candidate.identity(),
                    error = %source,
                    "Failed to remove image, ending reclaim pass"
                );
                return Err(CacheError::RemovalFailed {
                    identity: candidate.identity().to_string(),
                    source,
                });
            }

            let finished = self.cache.finish_eviction(candidate.identity()).await;
            reservation.complete();
            match finished {
                Some(entry) => {
                    report.freed_bytes = report.freed_bytes.saturating_add(entry.size_bytes());
                    report.evicted.push(entry.identity().to_string());
                    info!(digest = %entry.identity(), size = entry.size_bytes(), "Evicted image");
                }
                None => {
                    debug!(digest = %candidate.identity(), "Image removed concurrently");
                }
            }
        }

        report.total_size_bytes = self.cache.total_size().await;
        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                freed = report.freed_bytes,
                total_size = report.total_size_bytes,
                "Reclaim pass complete"
            );
        }
        Ok(report)
    }

    async fn remove_image(&self, entry: &ImageEntry) -> anyhow::Result<()> {
        match self.removal_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.remover.remove_image(entry))
                .await
                .map_err(|_| anyhow::anyhow!("removal timed out after {timeout:?}"))?,
            None => self.remover.remove_image(entry).await,
        }
    }
}

/// Eviction reservation held while the runtime removes an image.
///
/// Dropped without [`complete`](Self::complete) or
/// [`release`](Self::release) (the pass was cancelled mid-removal), it
/// releases the reservation in the background so the entry can be pinned and
/// evicted again.
struct Reservation {
    cache: Arc<ImageCache>,
    identity: String,
    armed: bool,
}

impl Reservation {
    fn new(cache: Arc<ImageCache>, identity: &str) -> Self {
        Self {
            cache,
            identity: identity.to_string(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        self.cache.abort_eviction(&self.identity).await;
    }

    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(digest = %self.identity, "No runtime to release eviction reservation");
            return;
        };
        let cache = self.cache.clone();
        let identity = std::mem::take(&mut self.identity);
        debug!(digest = %identity, "Reclaim pass cancelled, releasing reservation");
        handle.spawn(async move {
            cache.abort_eviction(&identity).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::entry::ImageMetadata;

    /// Records removals; fails for identities listed in `fail`.
    #[derive(Default)]
    struct RecordingRemover {
        removed: StdMutex<Vec<String>>,
        fail: Vec<String>,
    }

    #[async_trait]
    impl ImageRemover for RecordingRemover {
        async fn remove_image(&self, entry: &ImageEntry) -> anyhow::Result<()> {
            if self.fail.iter().any(|f| f == entry.identity()) {
                anyhow::bail!("image is referenced by a stopped container");
            }
            self.removed
                .lock()
                .unwrap()
                .push(entry.identity().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reclaim_noop_under_capacity() {
        let cache = Arc::new(ImageCache::with_max_size(100));
        cache.add("a", 50, ImageMetadata::new("a")).await;
        let remover = Arc::new(RecordingRemover::default());

        let report = Reclaimer::new(cache.clone(), remover.clone())
            .reclaim()
            .await
            .unwrap();

        assert!(report.evicted.is_empty());
        assert_eq!(report.total_size_bytes, 50);
        assert!(remover.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reclaim_failure_keeps_entry() {
        let cache = Arc::new(ImageCache::with_max_size(100));
        cache.add("x", 60, ImageMetadata::new("x")).await;
        cache.add("y", 60, ImageMetadata::new("y")).await;
        cache.mark("y").await.unwrap();
        let remover = Arc::new(RecordingRemover {
            fail: vec!["x".to_string()],
            ..Default::default()
        });

        let err = Reclaimer::new(cache.clone(), remover.clone())
            .reclaim()
            .await
            .unwrap_err();

        assert!(err.is_removal_failure());
        assert!(cache.contains("x").await);
        assert_eq!(cache.total_size().await, 120);
        assert_eq!(cache.stats().await.removal_failures, 1);
        // the pass stopped instead of moving on to y
        assert!(remover.removed.lock().unwrap().is_empty());
    }
}
