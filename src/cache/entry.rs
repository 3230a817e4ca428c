//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with sliding TTL support.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::cache::expiry::ExpirationHandle;

/// Deadline used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

// == Cache Entry ==
/// A single cached value plus its access metadata.
///
/// Entries handed out by a bucket are snapshots: mutating the cache afterwards
/// never changes an `Entry` a caller already holds.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    key: String,
    value: V,
    /// Sliding window, zero = never expires
    ttl: Duration,
    created_at: Instant,
    /// Wall-clock twin of `created_at`, for humans reading logs
    created_at_utc: DateTime<Utc>,
    last_access_at: Instant,
    access_count: u64,
    /// Slot in the owning bucket's expiration queue, set iff the entry is
    /// resident and `ttl` is non-zero
    pub(crate) expiration: Option<ExpirationHandle>,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    ///
    /// # Arguments
    /// * `key` - The key the entry is stored under
    /// * `value` - The payload
    /// * `ttl` - Sliding lifetime, `Duration::ZERO` for an entry that never expires
    pub fn new(key: impl Into<String>, value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            ttl,
            created_at: now,
            created_at_utc: Utc::now(),
            last_access_at: now,
            access_count: 0,
            expiration: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry, returning its payload.
    pub fn into_value(self) -> V {
        self.value
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.created_at_utc
    }

    pub fn last_access_at(&self) -> Instant {
        self.last_access_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Returns true if the entry takes part in expiration.
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }

    // == Expires At ==
    /// Returns the instant the entry becomes due for disposal.
    ///
    /// # Returns
    /// - `Some(last_access_at + ttl)` if the entry has a TTL
    /// - `None` if the entry never expires
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires().then(|| deadline(self.last_access_at, self.ttl))
    }

    // == Keep Alive ==
    /// Records a successful read at `now`, sliding the expiry window forward.
    ///
    /// Only the entry is touched. The owner must re-sift the entry's queue record
    /// with the returned deadline.
    pub(crate) fn keep_alive(&mut self, now: Instant) -> Option<Instant> {
        self.last_access_at = now;
        self.access_count += 1;
        self.expires_at()
    }
}

/// Adds `ttl` to `from`, saturating at a far-future instant.
pub(crate) fn deadline(from: Instant, ttl: Duration) -> Instant {
    from.checked_add(ttl)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}
