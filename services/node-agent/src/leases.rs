//! Image leases for function invocations.
//!
//! An invocation acquires a lease before starting a container from an image
//! and releases it when the container exits. Holding a lease pins the image
//! so reclaim passes leave it alone.
//!
//! Pinning is not atomic with admission: a reclaim pass can remove an image
//! between `add` and `lock`. `acquire` re-admits once in that case and
//! otherwise reports `NotFound`, which callers treat as "pull again".

use std::sync::Arc;

use fnagent_image_cache::{CacheError, ImageCache, ImageMetadata, Reclaimer};
use tokio::sync::Notify;
use tracing::{debug, warn};

const ADMIT_ATTEMPTS: u32 = 2;

/// Pins images on behalf of running containers.
pub struct ImageLeases {
    cache: Arc<ImageCache>,
    reclaimer: Arc<Reclaimer>,
    trigger: Arc<Notify>,
}

impl ImageLeases {
    /// `trigger` wakes the background reclaim loop.
    pub fn new(reclaimer: Arc<Reclaimer>, trigger: Arc<Notify>) -> Self {
        Self {
            cache: reclaimer.cache().clone(),
            reclaimer,
            trigger,
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Admit (or refresh) a pulled image and pin it.
    ///
    /// The cache may end up over capacity; the reclaim loop is woken to deal
    /// with it in the background.
    pub async fn acquire(
        &self,
        identity: &str,
        size_bytes: u64,
        metadata: ImageMetadata,
    ) -> Result<(), CacheError> {
        for attempt in 1..=ADMIT_ATTEMPTS {
            self.cache.add(identity, size_bytes, metadata.clone()).await;

            match self.cache.lock(identity).await {
                Ok(()) => {
                    debug!(digest = %identity, "Acquired image lease");
                    self.trigger.notify_one();
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        digest = %identity,
                        attempt,
                        error = %err,
                        "Image evicted before it could be pinned"
                    );
                }
            }
        }

        Err(CacheError::NotFound(identity.to_string()))
    }

    /// Like [`acquire`](Self::acquire), but refuse the image if the cache
    /// cannot be brought back under capacity with it pinned.
    ///
    /// On refusal the pin is dropped again and the reclaim error is returned;
    /// the image stays cached and eligible for eviction.
    pub async fn acquire_strict(
        &self,
        identity: &str,
        size_bytes: u64,
        metadata: ImageMetadata,
    ) -> Result<(), CacheError> {
        self.acquire(identity, size_bytes, metadata).await?;

        if let Err(err) = self.reclaimer.reclaim().await {
            if self.cache.over_capacity().await {
                self.cache.unlock(identity).await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop the pin taken by a previous acquire.
    pub async fn release(&self, identity: &str) {
        self.cache.unlock(identity).await;
        debug!(digest = %identity, "Released image lease");
        self.trigger.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    fn leases(max_size: u64, runtime: Arc<MockRuntime>) -> ImageLeases {
        let cache = Arc::new(ImageCache::with_max_size(max_size));
        let reclaimer = Arc::new(Reclaimer::new(cache, runtime));
        ImageLeases::new(reclaimer, Arc::new(Notify::new()))
    }

    #[tokio::test]
    async fn test_acquire_pins_and_release_unpins() {
        let leases = leases(100, Arc::new(MockRuntime::new()));

        leases
            .acquire("img", 10, ImageMetadata::new("img"))
            .await
            .unwrap();
        assert!(leases.cache().locked("img").await.unwrap());

        leases.release("img").await;
        assert!(!leases.cache().locked("img").await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_existing_counts_as_use() {
        let leases = leases(100, Arc::new(MockRuntime::new()));

        leases.acquire("img", 10, ImageMetadata::new("img")).await.unwrap();
        leases.acquire("img", 10, ImageMetadata::new("img")).await.unwrap();

        let entry = leases.cache().get("img").await.unwrap();
        assert_eq!(entry.use_count(), 2);
        assert_eq!(entry.pins(), 2);
        assert_eq!(leases.cache().total_size().await, 10);
    }

    #[tokio::test]
    async fn test_strict_acquire_refuses_when_everything_pinned() {
        let runtime = Arc::new(MockRuntime::new());
        let leases = leases(100, runtime.clone());

        leases.acquire("a", 80, ImageMetadata::new("a")).await.unwrap();
        let err = leases
            .acquire_strict("b", 80, ImageMetadata::new("b"))
            .await
            .unwrap_err();

        assert!(err.is_capacity_unavailable());
        assert!(!leases.cache().locked("b").await.unwrap());
        assert!(leases.cache().locked("a").await.unwrap());
        assert_eq!(runtime.removals(), 0);
    }

    #[tokio::test]
    async fn test_strict_acquire_evicts_idle_images() {
        let runtime = Arc::new(MockRuntime::new());
        let leases = leases(100, runtime.clone());

        leases.acquire("a", 80, ImageMetadata::new("a")).await.unwrap();
        leases.release("a").await;

        leases
            .acquire_strict("b", 80, ImageMetadata::new("b"))
            .await
            .unwrap();

        assert!(!leases.cache().contains("a").await);
        assert!(leases.cache().locked("b").await.unwrap());
        assert_eq!(runtime.removals(), 1);
    }
}
