//! Image cache with pinning and scored eviction candidates.
//!
//! Entries and the running total size live behind one lock. Every operation
//! takes the lock, mutates memory, and releases it before returning; nothing
//! here performs I/O. Physical removal of images happens in
//! [`crate::reclaim`], outside the lock. While that happens the entry is
//! reserved: it cannot be pinned and is not offered as a candidate again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ImageCacheConfig;
use crate::entry::{ImageEntry, ImageMetadata};
use crate::error::CacheError;
use crate::score::eviction_order;

/// Result of [`ImageCache::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new entry was created.
    Inserted,
    /// The identity was already cached; it was marked as used instead.
    Refreshed,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, ImageEntry>,
    total_size: u64,
    next_seq: u64,
}

impl Inner {
    fn entry_mut(&mut self, identity: &str) -> Result<&mut ImageEntry, CacheError> {
        self.entries
            .get_mut(identity)
            .ok_or_else(|| CacheError::not_found(identity))
    }
}

/// Image cache manager.
#[derive(Debug)]
pub struct ImageCache {
    max_size: Option<u64>,
    inner: Mutex<Inner>,
    stats: CacheStats,
}

/// Cache statistics.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    removal_failures: AtomicU64,
}

/// Point-in-time copy of the cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub removal_failures: u64,
    pub current_size_bytes: u64,
    pub entries: usize,
}

impl ImageCache {
    /// Create a new image cache. A `max_size_bytes` of zero makes it unbounded.
    pub fn new(config: &ImageCacheConfig) -> Self {
        Self::with_max_size(config.max_size_bytes)
    }

    /// Create a cache with the given capacity in bytes (zero for unbounded).
    pub fn with_max_size(max_size_bytes: u64) -> Self {
        Self {
            max_size: (max_size_bytes > 0).then_some(max_size_bytes),
            inner: Mutex::new(Inner::default()),
            stats: CacheStats::default(),
        }
    }

    /// Configured capacity, or `None` if unbounded.
    pub fn max_size(&self) -> Option<u64> {
        self.max_size
    }

    /// Check if an image is cached.
    pub async fn contains(&self, identity: &str) -> bool {
        self.inner.lock().await.entries.contains_key(identity)
    }

    /// Snapshot of a cached entry. Counts toward hit/miss statistics but does
    /// not record a use.
    pub async fn get(&self, identity: &str) -> Option<ImageEntry> {
        let found = self.inner.lock().await.entries.get(identity).cloned();
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Register a pulled image.
    ///
    /// Adding an identity that is already cached counts as a use of the
    /// existing entry (and as a cache hit); its size and metadata are left as
    /// they were. A new entry counts as a miss. This never evicts, so the
    /// cache may be over capacity afterwards.
    pub async fn add(
        &self,
        identity: &str,
        size_bytes: u64,
        metadata: ImageMetadata,
    ) -> AddOutcome {
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.entries.get_mut(identity) {
            entry.touch();
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                digest = %identity,
                use_count = entry.use_count(),
                "Image already cached"
            );
            return AddOutcome::Refreshed;
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            identity.to_string(),
            ImageEntry::new(identity.to_string(), size_bytes, metadata, seq),
        );
        inner.total_size = inner.total_size.saturating_add(size_bytes);

        debug!(
            digest = %identity,
            size = size_bytes,
            total_size = inner.total_size,
            "Registered image"
        );
        AddOutcome::Inserted
    }

    /// Record a use of a cached image.
    pub async fn mark(&self, identity: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().await;
        inner.entry_mut(identity)?.touch();
        Ok(())
    }

    /// Pin an image so eviction skips it. Pins nest; each `lock` needs a
    /// matching [`unlock`](Self::unlock).
    ///
    /// An image a reclaim pass is already removing reports `NotFound`.
    pub async fn lock(&self, identity: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(identity)?;
        if entry.evicting() {
            debug!(digest = %identity, "Refusing pin on image being evicted");
            return Err(CacheError::not_found(identity));
        }
        entry.pin();
        debug!(digest = %identity, pins = entry.pins(), "Pinned image");
        Ok(())
    }

    /// Release one pin. Unknown identities are ignored, since the image may
    /// already have been removed.
    pub async fn unlock(&self, identity: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get_mut(identity) {
            entry.unpin();
            debug!(digest = %identity, pins = entry.pins(), "Released image pin");
        }
    }

    /// Whether an image is currently pinned.
    pub async fn locked(&self, identity: &str) -> Result<bool, CacheError> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(identity)
            .map(ImageEntry::pinned)
            .ok_or_else(|| CacheError::not_found(identity))
    }

    /// Drop an entry. Pinned entries may be removed this way; the caller is
    /// asserting the image data is gone.
    pub async fn remove(&self, identity: &str) -> Result<ImageEntry, CacheError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .entries
            .remove(identity)
            .ok_or_else(|| CacheError::not_found(identity))?;
        inner.total_size = inner.total_size.saturating_sub(entry.size_bytes());

        debug!(
            digest = %identity,
            size = entry.size_bytes(),
            total_size = inner.total_size,
            "Removed image"
        );
        Ok(entry)
    }

    /// Sum of the sizes of all cached images.
    pub async fn total_size(&self) -> u64 {
        self.inner.lock().await.total_size
    }

    /// Number of cached images.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Unpinned entries, most evictable first. Entries a reclaim pass is
    /// currently removing are left out.
    pub async fn evictable(&self) -> Vec<ImageEntry> {
        self.evictable_at(Instant::now()).await
    }

    /// Unpinned entries ranked as of `now`, most evictable first.
    pub async fn evictable_at(&self, now: Instant) -> Vec<ImageEntry> {
        let mut candidates: Vec<ImageEntry> = {
            let inner = self.inner.lock().await;
            inner
                .entries
                .values()
                .filter(|e| !e.pinned() && !e.evicting())
                .cloned()
                .collect()
        };

        candidates.sort_by(|a, b| eviction_order(a, b, now));
        candidates
    }

    /// Check if the cache holds more than its capacity.
    pub async fn over_capacity(&self) -> bool {
        match self.max_size {
            Some(max) => self.total_size().await > max,
            None => false,
        }
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStatsSnapshot {
        let (current_size_bytes, entries) = {
            let inner = self.inner.lock().await;
            (inner.total_size, inner.entries.len())
        };
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            removal_failures: self.stats.removal_failures.load(Ordering::Relaxed),
            current_size_bytes,
            entries,
        }
    }

    /// Reserve an entry for removal.
    ///
    /// Succeeds only if the entry is present, unpinned and not already
    /// reserved. Until [`finish_eviction`](Self::finish_eviction) or
    /// [`abort_eviction`](Self::abort_eviction), `lock` refuses the entry and
    /// `evictable` skips it.
    pub(crate) async fn begin_eviction(&self, identity: &str) -> Option<ImageEntry> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(identity)?;
        if entry.pinned() || entry.evicting() {
            return None;
        }
        entry.set_evicting(true);
        Some(entry.clone())
    }

    /// Release a reservation after a failed or abandoned removal.
    pub(crate) async fn abort_eviction(&self, identity: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get_mut(identity) {
            entry.set_evicting(false);
        }
    }

    /// Drop an entry whose image the removal action has deleted.
    ///
    /// Returns the removed entry, or `None` if it disappeared concurrently.
    pub(crate) async fn finish_eviction(&self, identity: &str) -> Option<ImageEntry> {
        let entry = self.remove(identity).await.ok()?;
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    pub(crate) fn record_removal_failure(&self) {
        self.stats.removal_failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn meta(id: &str) -> ImageMetadata {
        ImageMetadata::new(id)
    }

    #[tokio::test]
    async fn test_add_and_contains() {
        let cache = ImageCache::with_max_size(1000);

        let outcome = cache.add("sha256:abc123", 1024, meta("sha256:abc123")).await;
        assert_eq!(outcome, AddOutcome::Inserted);
        assert!(cache.contains("sha256:abc123").await);
        assert!(!cache.contains("sha256:other").await);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.total_size().await, 1024);
    }

    #[tokio::test]
    async fn test_add_twice_counts_size_once() {
        let cache = ImageCache::with_max_size(1000);

        cache.add("img", 100, meta("img")).await;
        let outcome = cache.add("img", 100, meta("img")).await;

        assert_eq!(outcome, AddOutcome::Refreshed);
        assert_eq!(cache.total_size().await, 100);
        assert_eq!(cache.get("img").await.unwrap().use_count(), 2);
    }

    #[tokio::test]
    async fn test_mark_updates_recency_and_count() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("img", 10, meta("img")).await;
        let before = cache.get("img").await.unwrap();

        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.mark("img").await.unwrap();

        let after = cache.get("img").await.unwrap();
        assert!(after.last_used_at() >= before.last_used_at());
        assert!(after.use_count() > before.use_count());
    }

    #[tokio::test]
    async fn test_missing_identity_errors() {
        let cache = ImageCache::with_max_size(1000);

        assert!(cache.mark("nope").await.unwrap_err().is_not_found());
        assert!(cache.lock("nope").await.unwrap_err().is_not_found());
        assert!(cache.locked("nope").await.unwrap_err().is_not_found());
        assert!(cache.remove("nope").await.unwrap_err().is_not_found());

        // unlock is a no-op
        cache.unlock("nope").await;
    }

    #[tokio::test]
    async fn test_lock_excludes_from_evictable() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("a", 10, meta("a")).await;
        cache.add("b", 10, meta("b")).await;

        cache.lock("a").await.unwrap();
        assert!(cache.locked("a").await.unwrap());

        let ids: Vec<_> = cache
            .evictable()
            .await
            .iter()
            .map(|e| e.identity().to_string())
            .collect();
        assert_eq!(ids, vec!["b"]);

        cache.unlock("a").await;
        assert!(!cache.locked("a").await.unwrap());
        assert_eq!(cache.evictable().await.len(), 2);
    }

    #[tokio::test]
    async fn test_nested_pins() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("a", 10, meta("a")).await;

        cache.lock("a").await.unwrap();
        cache.lock("a").await.unwrap();
        cache.unlock("a").await;
        assert!(cache.locked("a").await.unwrap());

        cache.unlock("a").await;
        assert!(!cache.locked("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_pinned_entry_explicitly() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("a", 40, meta("a")).await;
        cache.lock("a").await.unwrap();

        let removed = cache.remove("a").await.unwrap();
        assert_eq!(removed.size_bytes(), 40);
        assert_eq!(cache.total_size().await, 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_evictable_prefers_rarely_used() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("a", 10, meta("a")).await;
        cache.add("b", 10, meta("b")).await;
        for _ in 0..9 {
            cache.mark("a").await.unwrap();
        }

        let hour_later = Instant::now() + Duration::from_secs(3600);
        let order: Vec<_> = cache
            .evictable_at(hour_later)
            .await
            .iter()
            .map(|e| e.identity().to_string())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_over_capacity() {
        let cache = ImageCache::with_max_size(100);
        cache.add("x", 60, meta("x")).await;
        assert!(!cache.over_capacity().await);

        cache.add("y", 60, meta("y")).await;
        assert!(cache.over_capacity().await);
        assert_eq!(cache.total_size().await, 120);
    }

    #[tokio::test]
    async fn test_total_size_saturates() {
        let cache = ImageCache::with_max_size(0);
        let half = u64::MAX / 2 + 1;
        cache.add("x", half, meta("x")).await;
        cache.add("y", half, meta("y")).await;

        assert_eq!(cache.total_size().await, u64::MAX);
        assert_eq!(cache.len().await, 2);

        cache.remove("x").await.unwrap();
        cache.remove("y").await.unwrap();
        assert_eq!(cache.total_size().await, 0);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_unbounded() {
        let cache = ImageCache::new(&ImageCacheConfig::with_max_size(0));
        cache.add("x", u64::MAX / 2, meta("x")).await;

        assert_eq!(cache.max_size(), None);
        assert!(!cache.over_capacity().await);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("a", 10, meta("a")).await;
        assert_eq!(cache.stats().await.misses, 1);

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("missing").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.current_size_bytes, 10);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_readmission_counts_as_hit() {
        let cache = ImageCache::with_max_size(1000);

        cache.add("img", 10, meta("img")).await;
        cache.add("img", 10, meta("img")).await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_eviction_reservation() {
        let cache = ImageCache::with_max_size(1000);
        cache.add("a", 10, meta("a")).await;
        cache.add("b", 10, meta("b")).await;
        cache.lock("b").await.unwrap();

        // pinned entries cannot be reserved
        assert!(cache.begin_eviction("b").await.is_none());
        assert!(cache.begin_eviction("missing").await.is_none());

        let reserved = cache.begin_eviction("a").await.unwrap();
        assert_eq!(reserved.identity(), "a");
        assert!(cache.begin_eviction("a").await.is_none());
        assert!(cache.lock("a").await.unwrap_err().is_not_found());
        assert!(cache.evictable().await.is_empty());
        assert!(cache.contains("a").await);

        cache.abort_eviction("a").await;
        cache.lock("a").await.unwrap();
        assert!(cache.locked("a").await.unwrap());
        assert!(cache.begin_eviction("a").await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_passes_through() {
        let cache = ImageCache::with_max_size(1000);
        let metadata = ImageMetadata {
            repo_tags: Some(vec!["fn/hello:1".to_string()]),
            created: 42,
            ..meta("sha256:abc")
        };
        cache.add("fn/hello:1", 5, metadata.clone()).await;

        assert_eq!(cache.get("fn/hello:1").await.unwrap().metadata(), &metadata);
    }
}
