//! Eviction scoring.
//!
//! An entry's score is its idle time divided by its use count. Images that
//! were used often and recently score low and stay; images that sat idle for
//! a long time after few uses score high and are evicted first.

use std::cmp::Ordering;
use std::time::Instant;

use crate::entry::ImageEntry;

/// Idle seconds per recorded use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f64);

impl Score {
    pub fn value(self) -> f64 {
        self.0
    }
}

/// Score an entry as of `now`.
pub fn score(entry: &ImageEntry, now: Instant) -> Score {
    let idle = now.saturating_duration_since(entry.last_used_at());
    // use_count starts at 1 and never decreases
    Score(idle.as_secs_f64() / entry.use_count() as f64)
}

/// Order two entries most-evictable first.
///
/// Higher scores come first; equal scores fall back to admission order so the
/// longest-resident entry goes first.
pub fn eviction_order(a: &ImageEntry, b: &ImageEntry, now: Instant) -> Ordering {
    score(b, now)
        .0
        .total_cmp(&score(a, now).0)
        .then_with(|| a.inserted_seq().cmp(&b.inserted_seq()))
}
