//! Local image cache for the fnagent function runner.
//!
//! Pulling images is slow, so the agent keeps recently used images on disk up
//! to a configured size. This crate tracks which images are cached, which
//! are in use by running containers, and which should go first when space is
//! needed.
//!
//! ## Modules
//!
//! - `entry`: cached image records and runtime metadata
//! - `score`: eviction scoring (idle time per use)
//! - `store`: the [`ImageCache`] itself
//! - `reclaim`: reclaim passes that call out to the runtime to delete images
//!
//! ## Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use fnagent_image_cache::{ImageCache, ImageMetadata, ImageRemover, Reclaimer};
//! # async fn run(remover: Arc<dyn ImageRemover>) -> Result<(), fnagent_image_cache::CacheError> {
//! let cache = Arc::new(ImageCache::with_max_size(10 * 1024 * 1024 * 1024));
//! let reclaimer = Reclaimer::new(cache.clone(), remover);
//!
//! cache.add("sha256:abc", 512 * 1024 * 1024, ImageMetadata::new("sha256:abc")).await;
//! cache.lock("sha256:abc").await?;
//! reclaimer.reclaim().await?;
//! // ... run the container ...
//! cache.unlock("sha256:abc").await;
//! # Ok(())
//! # }
//! ```

mod config;
mod entry;
mod error;
mod reclaim;
mod score;
mod store;

pub use config::ImageCacheConfig;
pub use entry::{ImageEntry, ImageMetadata};
pub use error::CacheError;
pub use reclaim::{ImageRemover, ReclaimReport, Reclaimer};
pub use score::{eviction_order, score, Score};
pub use store::{AddOutcome, CacheStatsSnapshot, ImageCache};
