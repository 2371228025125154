//! Cached image records.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Descriptive record of an image as reported by the container runtime.
///
/// The cache never inspects this; it is stored on admission and handed back
/// to the removal action. Field names follow the Docker Engine
/// `GET /images/json` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageMetadata {
    /// Runtime image ID (`sha256:...`).
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub repo_digests: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    /// Creation time as a Unix timestamp.
    #[serde(default)]
    pub created: i64,
    /// Size in bytes as reported by the runtime.
    #[serde(default)]
    pub size: i64,
}

impl ImageMetadata {
    /// Metadata carrying only an image ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Reported size, clamped to zero for runtimes that send negative values.
    pub fn size_bytes(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }
}

/// A cached image entry.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    identity: String,
    size_bytes: u64,
    last_used_at: Instant,
    use_count: u64,
    pins: u32,
    evicting: bool,
    inserted_seq: u64,
    metadata: ImageMetadata,
}

impl ImageEntry {
    pub(crate) fn new(
        identity: String,
        size_bytes: u64,
        metadata: ImageMetadata,
        inserted_seq: u64,
    ) -> Self {
        Self {
            identity,
            size_bytes,
            last_used_at: Instant::now(),
            use_count: 1,
            pins: 0,
            evicting: false,
            inserted_seq,
            metadata,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Number of recorded uses, including admission. Never zero.
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    /// Whether any container currently holds this image.
    pub fn pinned(&self) -> bool {
        self.pins > 0
    }

    /// Number of outstanding pins.
    pub fn pins(&self) -> u32 {
        self.pins
    }

    /// Whether a reclaim pass is currently removing this image.
    pub fn evicting(&self) -> bool {
        self.evicting
    }

    /// Admission order; lower values have been resident longer.
    pub fn inserted_seq(&self) -> u64 {
        self.inserted_seq
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = self.last_used_at.max(Instant::now());
        self.use_count = self.use_count.saturating_add(1);
    }

    pub(crate) fn pin(&mut self) {
        self.pins = self.pins.saturating_add(1);
    }

    pub(crate) fn unpin(&mut self) {
        self.pins = self.pins.saturating_sub(1);
    }

    pub(crate) fn set_evicting(&mut self, evicting: bool) {
        self.evicting = evicting;
    }
}
