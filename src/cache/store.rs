//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, Clock, LruTracker, SystemClock};
use crate::config::{CacheOptions, Limit};

// == Cache Store ==
/// Bounded key-value storage with LRU eviction and TTL expiration.
///
/// Expiry is lazy: an entry past its TTL is dropped the next time it is
/// looked up (or by an explicit [`CacheStore::purge_expired`]), never by a
/// background task. A store with a zero capacity or a zero TTL keeps nothing.
/// A disabled capacity means no size bound; a disabled TTL means entries
/// never expire.
#[derive(Debug)]
pub struct CacheStore<K, V> {
    /// Key-value storage
    entries: HashMap<K, CacheEntry<V>>,
    /// LRU access tracker
    lru: LruTracker<K>,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: Limit<usize>,
    /// Lifetime of every entry
    ttl: Limit<Duration>,
    /// Time source for insertion stamps and expiry checks
    clock: Arc<dyn Clock>,
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates a new CacheStore with specified capacity and entry lifetime.
    ///
    /// # Arguments
    /// * `max_entries` - Maximum number of entries the cache can hold
    /// * `ttl` - How long an entry stays valid after insertion
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self::with_clock(max_entries, ttl, Arc::new(SystemClock))
    }

    /// Creates a new CacheStore reading time from `clock`.
    pub fn with_clock(max_entries: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(Limit::Bounded(max_entries), Limit::Bounded(ttl), clock)
    }

    /// Creates a store where either bound may be switched off.
    pub fn with_limits(
        max_entries: Limit<usize>,
        ttl: Limit<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries,
            ttl,
            clock,
        }
    }

    /// Creates a store sized by `options`. Options with caching switched
    /// off give a store that retains nothing.
    pub fn from_options(options: &CacheOptions, clock: Arc<dyn Clock>) -> Self {
        if options.is_enabled() {
            Self::with_limits(options.max_cache_size, options.max_cache_ttl, clock)
        } else {
            Self::with_clock(0, Duration::ZERO, clock)
        }
    }

    // == Get ==
    /// Retrieves a live value by key.
    ///
    /// A hit marks the key as most recently used. An expired entry is
    /// removed on the spot and reported as a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if let Limit::Bounded(ttl) = self.ttl {
                if entry.is_expired(now, ttl) {
                    let age = entry.age(now);
                    self.entries.remove(key);
                    self.lru.remove(key);
                    self.stats.set_total_entries(self.entries.len());
                    self.stats.record_expiration();
                    self.stats.record_miss();
                    debug!(
                        "Cache miss: entry aged {:?} outlived its {:?} TTL and was removed ({} entries left)",
                        age,
                        ttl,
                        self.entries.len()
                    );
                    return None;
                }
                debug!(
                    "Cache hit: {:?} of TTL remaining ({} entries held)",
                    entry.ttl_remaining(now, ttl),
                    self.entries.len()
                );
            } else {
                debug!("Cache hit: entry never expires ({} entries held)", self.entries.len());
            }

            let value = entry.value.clone();
            self.stats.record_hit();
            self.lru.touch(key);
            Some(value)
        } else {
            self.stats.record_miss();
            debug!("Cache miss: key absent ({} entries held)", self.entries.len());
            None
        }
    }

    // == Put ==
    /// Stores a value, replacing any previous entry and restarting its TTL.
    ///
    /// Inserting a new key into a full store first evicts least recently
    /// used entries until there is room. Overwriting never evicts.
    pub fn put(&mut self, key: K, value: V) {
        if !self.retains_entries() {
            return;
        }

        if let Limit::Bounded(max_entries) = self.max_entries {
            if !self.entries.contains_key(&key) {
                while self.entries.len() >= max_entries {
                    let Some(evicted) = self.lru.evict_oldest() else {
                        break;
                    };
                    self.entries.remove(&evicted);
                    self.stats.record_eviction();
                    debug!(
                        "Evicted least recently used entry (capacity {})",
                        max_entries
                    );
                }
            }
        }

        let entry = CacheEntry::new(value, self.clock.now());
        self.entries.insert(key.clone(), entry);
        self.lru.touch(&key);
        debug_assert_eq!(self.lru.len(), self.entries.len());
        self.stats.set_total_entries(self.entries.len());
    }

    // == Remove ==
    /// Drops a single entry. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            self.lru.remove(key);
            self.stats.set_total_entries(self.entries.len());
            true
        } else {
            false
        }
    }

    // == Clear ==
    /// Removes all entries. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.stats.set_total_entries(0);
    }

    // == Purge Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self) -> usize {
        let Limit::Bounded(ttl) = self.ttl else {
            return 0;
        };
        let now = self.clock.now();
        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expiration();
        }

        self.stats.set_total_entries(self.entries.len());
        expired_keys.len()
    }

    // == Contains ==
    /// Checks for a live entry without touching LRU order or statistics.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|entry| match self.ttl {
                Limit::Bounded(ttl) => !entry.is_expired(now, ttl),
                Limit::Disabled => true,
            })
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    /// Returns the number of stored entries, expired ones included until
    /// they are looked up or purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> Limit<usize> {
        self.max_entries
    }

    pub fn ttl(&self) -> Limit<Duration> {
        self.ttl
    }

    fn retains_entries(&self) -> bool {
        self.max_entries != Limit::Bounded(0) && self.ttl != Limit::Bounded(Duration::ZERO)
    }
}
