//! Bucket Statistics Module
//!
//! Tracks lookup outcomes and the reasons entries left a bucket.

use serde::Serialize;

// == Bucket Stats ==
/// Counters for a single bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    /// Lookups served from a resident entry
    pub hits: u64,
    /// Lookups that found nothing resident (loader fills included)
    pub misses: u64,
    /// Misses filled by the data loader
    pub loads: u64,
    /// Entries removed by the background sweep
    pub expirations: u64,
    /// Entries removed for reaching the access ceiling
    pub evictions: u64,
    /// Current number of entries in the bucket
    pub entries: usize,
}

impl BucketStats {
    // == Constructor ==
    /// Creates a new BucketStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_load(&mut self) {
        self.loads += 1;
    }

    pub(crate) fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }
}
