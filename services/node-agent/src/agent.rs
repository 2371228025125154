//! Wiring of the image cache, reclaim driver, leases and reclaim loop.
//!
//! Everything that changes the cache's size (seeding, lease acquire and
//! release) kicks the same trigger the background loop waits on, so a pass
//! runs right away instead of at the next interval tick.

use std::sync::Arc;
use std::time::Duration;

use fnagent_image_cache::{ImageCache, ImageCacheConfig, Reclaimer};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::gc;
use crate::leases::ImageLeases;
use crate::runtime::{seed_cache, ImageRuntime};

/// Image cache state for one node.
pub struct Agent {
    cache: Arc<ImageCache>,
    reclaimer: Arc<Reclaimer>,
    leases: Arc<ImageLeases>,
    trigger: Arc<Notify>,
}

impl Agent {
    pub fn new<R: ImageRuntime + 'static>(config: &ImageCacheConfig, runtime: Arc<R>) -> Self {
        let cache = Arc::new(ImageCache::new(config));
        if cache.max_size().is_none() {
            info!("Image cache is unbounded");
        }

        let reclaimer = Arc::new(
            Reclaimer::new(Arc::clone(&cache), runtime)
                .with_removal_timeout(config.removal_timeout),
        );
        let trigger = Arc::new(Notify::new());
        let leases = Arc::new(ImageLeases::new(
            Arc::clone(&reclaimer),
            Arc::clone(&trigger),
        ));

        Self {
            cache,
            reclaimer,
            leases,
            trigger,
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Lease handle for invocation workers.
    pub fn leases(&self) -> &Arc<ImageLeases> {
        &self.leases
    }

    /// Register images already present in the runtime and wake the loop.
    pub async fn seed<R: ImageRuntime + ?Sized>(&self, runtime: &R) -> anyhow::Result<usize> {
        let seeded = seed_cache(&self.cache, runtime).await;
        self.trigger.notify_one();
        seeded
    }

    /// Start the background reclaim loop.
    pub fn spawn_reclaim_loop(
        &self,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(gc::run_reclaim_loop(
            Arc::clone(&self.reclaimer),
            Arc::clone(&self.trigger),
            interval,
            shutdown,
        ))
    }
}
