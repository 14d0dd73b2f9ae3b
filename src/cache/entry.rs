//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and their age checks.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// A cached value and the instant it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the value was inserted (monotonic)
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    pub fn new(value: V, inserted_at: Instant) -> Self {
        Self { value, inserted_at }
    }

    // == Age ==
    /// Time elapsed since insertion, saturating at zero.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    // == Is Expired ==
    /// Checks whether the entry has outlived `ttl`.
    ///
    /// An entry is still valid while `now - inserted_at <= ttl`; it expires
    /// strictly after the full lifetime has elapsed.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) > ttl
    }

    // == Time To Live ==
    /// Remaining validity, or zero once expired.
    pub fn ttl_remaining(&self, now: Instant, ttl: Duration) -> Duration {
        ttl.saturating_sub(self.age(now))
    }
}
