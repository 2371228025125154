//! Error types for cache operations and reclaim passes.

use thiserror::Error;

/// Errors returned by the image cache and the reclaim driver.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry exists for the given identity.
    #[error("image not cached: {0}")]
    NotFound(String),

    /// The external removal action failed; the entry was kept.
    #[error("failed to remove image {identity}: {source}")]
    RemovalFailed {
        identity: String,
        #[source]
        source: anyhow::Error,
    },

    /// Every remaining entry is pinned and the cache is still over capacity.
    #[error(
        "cache over capacity with no evictable images: {total_size_bytes} > {max_size_bytes} bytes"
    )]
    CapacityUnavailable {
        total_size_bytes: u64,
        max_size_bytes: u64,
        /// Bytes freed earlier in the same pass.
        freed_bytes: u64,
    },
}

impl CacheError {
    pub(crate) fn not_found(identity: &str) -> Self {
        CacheError::NotFound(identity.to_string())
    }

    /// Returns true if the identity was not in the cache.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    /// Returns true if the runtime failed to remove an image.
    pub fn is_removal_failure(&self) -> bool {
        matches!(self, CacheError::RemovalFailed { .. })
    }

    /// Returns true if capacity could not be restored because of pinned images.
    pub fn is_capacity_unavailable(&self) -> bool {
        matches!(self, CacheError::CapacityUnavailable { .. })
    }
}
