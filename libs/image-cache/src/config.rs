//! Configuration for the image cache.

use std::time::Duration;

/// Configuration for the image cache and its reclaim driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheConfig {
    /// Maximum cache size in bytes. Zero means unbounded.
    pub max_size_bytes: u64,
    /// Upper bound on a single call to the removal action.
    pub removal_timeout: Duration,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024 * 1024, // 50 GiB
            removal_timeout: Duration::from_secs(120),
        }
    }
}

impl ImageCacheConfig {
    /// Configuration with the given capacity and default timeouts.
    pub fn with_max_size(max_size_bytes: u64) -> Self {
        Self {
            max_size_bytes,
            ..Default::default()
        }
    }

    /// Capacity bound, or `None` if the cache is unbounded.
    pub fn capacity(&self) -> Option<u64> {
        (self.max_size_bytes > 0).then_some(self.max_size_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_unbounded() {
        assert_eq!(ImageCacheConfig::with_max_size(0).capacity(), None);
        assert_eq!(ImageCacheConfig::with_max_size(100).capacity(), Some(100));
    }
}
