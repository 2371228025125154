//! Container runtime interface and mock implementation.
//!
//! The agent needs two things from the runtime: the list of images already
//! on the host, and a way to delete an image the cache evicts. A mock
//! implementation is provided for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use fnagent_image_cache::{AddOutcome, ImageCache, ImageEntry, ImageMetadata, ImageRemover};

/// Container runtime interface.
#[async_trait]
pub trait ImageRuntime: ImageRemover {
    /// List images present on the host.
    async fn list_images(&self) -> Result<Vec<ImageMetadata>>;
}

/// Register every image the runtime already holds.
///
/// Returns the number of newly cached images. The cache may be over capacity
/// afterwards; run a reclaim pass to bring it back.
pub async fn seed_cache<R>(cache: &ImageCache, runtime: &R) -> Result<usize>
where
    R: ImageRuntime + ?Sized,
{
    let images = runtime.list_images().await?;
    let mut inserted = 0;

    for image in images {
        let outcome = cache
            .add(&image.id, image.size_bytes(), image.clone())
            .await;
        if outcome == AddOutcome::Inserted {
            inserted += 1;
        }
    }

    info!(
        inserted,
        total_size = cache.total_size().await,
        "Seeded image cache from runtime"
    );
    Ok(inserted)
}

/// Mock runtime for testing and development.
#[derive(Default)]
pub struct MockRuntime {
    /// Images "present" on the host, keyed by ID.
    images: Mutex<HashMap<String, ImageMetadata>>,

    /// Number of successful removals.
    removals: AtomicU64,

    /// Whether removals should "fail".
    fail_removals: bool,
}

impl MockRuntime {
    /// Create a new mock runtime with no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock runtime holding the given images.
    pub fn with_images(images: impl IntoIterator<Item = ImageMetadata>) -> Self {
        Self {
            images: Mutex::new(images.into_iter().map(|i| (i.id.clone(), i)).collect()),
            ..Default::default()
        }
    }

    /// Create a mock runtime that fails all removals.
    pub fn failing() -> Self {
        Self {
            fail_removals: true,
            ..Default::default()
        }
    }

    /// Pretend an image was pulled.
    pub async fn insert(&self, image: ImageMetadata) {
        self.images.lock().await.insert(image.id.clone(), image);
    }

    /// Whether the runtime still holds an image.
    pub async fn has_image(&self, id: &str) -> bool {
        self.images.lock().await.contains_key(id)
    }

    /// Number of successful removals so far.
    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageRemover for MockRuntime {
    async fn remove_image(&self, entry: &ImageEntry) -> Result<()> {
        if self.fail_removals {
            anyhow::bail!("Mock runtime configured to fail");
        }

        let id = match entry.metadata().id.as_str() {
            "" => entry.identity(),
            id => id,
        };
        self.images.lock().await.remove(id);
        self.removals.fetch_add(1, Ordering::SeqCst);

        debug!(image = %id, "[MOCK] Removed image");
        Ok(())
    }
}

#[async_trait]
impl ImageRuntime for MockRuntime {
    async fn list_images(&self) -> Result<Vec<ImageMetadata>> {
        let mut images: Vec<_> = self.images.lock().await.values().cloned().collect();
        images.sort_by_key(|i| i.created);
        Ok(images)
    }
}
