//! Cached Fetcher
//!
//! Wraps a loader with the bounded cache. The configuration is read once
//! per lookup; while it reports caching disabled the store is never
//! consulted and every lookup goes straight to the loader. A disabled lookup
//! still drops a store left over from an older configuration.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, CacheStore, Clock, SystemClock};
use crate::config::{CacheConfiguration, CacheOptions, ConfigSnapshot};
use crate::error::Result;
use crate::fetch::{AsyncLoader, Loader};

/// The store together with the configuration generation it was built for.
struct StoreSlot<K, V> {
    generation: u64,
    store: CacheStore<K, V>,
    /// Counters carried over from stores discarded by reconfiguration
    retired: CacheStats,
}

// == Cached Fetcher ==
/// Looks keys up through an expiring LRU cache in front of a loader.
///
/// With the cache enabled, repeated lookups of a key within its TTL call
/// the loader once. With it disabled (the default) every lookup calls the
/// loader. Loader errors come back untouched and are never cached.
///
/// Concurrent misses on the same key may each call the loader; the store
/// lock is never held while the loader runs.
pub struct CachedFetcher<K, V, L> {
    config: Arc<CacheConfiguration>,
    loader: L,
    clock: Arc<dyn Clock>,
    slot: Mutex<StoreSlot<K, V>>,
    /// Mirrors `slot.generation` so disabled lookups can skip the lock
    generation: AtomicU64,
    /// Loader outcomes, which are counted whether or not caching is on
    load_stats: Mutex<CacheStats>,
}

impl<K, V, L> CachedFetcher<K, V, L>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates a fetcher reading its bounds from `config`.
    pub fn new(config: Arc<CacheConfiguration>, loader: L) -> Self {
        Self::with_clock(config, loader, Arc::new(SystemClock))
    }

    /// Creates a fetcher whose store reads time from `clock`.
    pub fn with_clock(config: Arc<CacheConfiguration>, loader: L, clock: Arc<dyn Clock>) -> Self {
        let snapshot = config.snapshot();
        let slot = StoreSlot {
            generation: snapshot.generation,
            store: CacheStore::from_options(&snapshot.options, Arc::clone(&clock)),
            retired: CacheStats::new(),
        };

        Self {
            config,
            loader,
            clock,
            generation: AtomicU64::new(slot.generation),
            slot: Mutex::new(slot),
            load_stats: Mutex::new(CacheStats::new()),
        }
    }

    // == Configure ==
    /// Changes the shared configuration and drops everything cached here.
    pub fn configure<F>(&self, f: F) -> Result<CacheOptions>
    where
        F: FnOnce(&mut CacheOptions),
    {
        let options = self.config.configure(f)?;
        self.sync_with(&self.config.snapshot());
        Ok(options)
    }

    // == Reset To Defaults ==
    /// Switches caching off and drops everything cached here.
    pub fn reset_to_defaults(&self) {
        self.config.reset_to_defaults();
        self.sync_with(&self.config.snapshot());
    }

    // == Invalidate ==
    /// Drops the cached value for `key`, if any.
    pub fn invalidate(&self, key: &K) -> bool {
        self.slot.lock().store.remove(key)
    }

    // == Clear ==
    /// Drops every cached value. Statistics are kept.
    pub fn clear(&self) {
        self.slot.lock().store.clear();
        debug!("Cache cleared");
    }

    // == Stats ==
    /// Returns statistics accumulated over the fetcher's whole life.
    pub fn stats(&self) -> CacheStats {
        let slot = self.slot.lock();
        let mut stats = slot.retired.clone();
        stats.absorb(&slot.store.stats());
        stats.absorb(&self.load_stats.lock());
        stats.set_total_entries(slot.store.len());
        stats
    }

    /// Number of entries currently held.
    pub fn cached_len(&self) -> usize {
        self.slot.lock().store.len()
    }

    pub fn config(&self) -> &Arc<CacheConfiguration> {
        &self.config
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    // == Internal Helpers ==
    /// Rebuilds the store if the configuration moved past the slot's generation.
    fn sync_with(&self, snapshot: &ConfigSnapshot) {
        let mut slot = self.slot.lock();
        self.sync_slot(&mut slot, snapshot);
    }

    /// Like `sync_with`, but only takes the lock when the store is stale.
    fn sync_if_stale(&self, snapshot: &ConfigSnapshot) {
        if self.generation.load(Ordering::Acquire) < snapshot.generation {
            self.sync_with(snapshot);
        }
    }

    fn sync_slot(&self, slot: &mut StoreSlot<K, V>, snapshot: &ConfigSnapshot) {
        if snapshot.generation <= slot.generation {
            return;
        }

        let old_stats = slot.store.stats();
        let old_generation = slot.generation;
        slot.retired.absorb(&old_stats);
        slot.store = CacheStore::from_options(&snapshot.options, Arc::clone(&self.clock));
        slot.generation = snapshot.generation;
        self.generation.store(snapshot.generation, Ordering::Release);

        info!(
            "Cache store rebuilt for configuration generation {} (was {}, {} entries dropped, caching {})",
            snapshot.generation,
            old_generation,
            old_stats.total_entries,
            if snapshot.options.is_enabled() { "on" } else { "off" }
        );
    }

    /// Looks `key` up in a store matching `snapshot`. A store built for a
    /// different generation is never consulted.
    fn lookup(&self, key: &K, snapshot: &ConfigSnapshot) -> Option<V> {
        let mut slot = self.slot.lock();
        self.sync_slot(&mut slot, snapshot);

        if slot.generation != snapshot.generation {
            debug!(
                "Store is at generation {}, lookup read generation {}; bypassing cache",
                slot.generation, snapshot.generation
            );
            return None;
        }

        let value = slot.store.get(key);
        debug!(
            "Cache {} at generation {} ({} of {:?} entries held)",
            if value.is_some() { "hit" } else { "miss" },
            slot.generation,
            slot.store.len(),
            slot.store.max_entries()
        );
        value
    }

    /// Stores a freshly loaded value unless the configuration changed
    /// while the loader was running.
    fn remember(&self, key: &K, value: V, snapshot: &ConfigSnapshot) {
        let mut slot = self.slot.lock();
        if slot.generation != snapshot.generation {
            debug!(
                "Configuration moved from generation {} to {} during load; result not cached",
                snapshot.generation, slot.generation
            );
            return;
        }
        slot.store.put(key.clone(), value);
    }

    fn record_load(&self, succeeded: bool) {
        let mut load_stats = self.load_stats.lock();
        if succeeded {
            load_stats.record_load();
        } else {
            load_stats.record_load_failure();
            warn!(
                "Loader failed; nothing cached ({} failures so far)",
                load_stats.load_failures
            );
        }
    }
}

impl<K, V, L> CachedFetcher<K, V, L>
where
    K: Hash + Eq + Clone,
    V: Clone,
    L: Loader<K, V>,
{
    // == Fetch For Key ==
    /// Returns the value for `key`, from the cache when possible.
    pub fn fetch_for_key(&self, key: &K) -> std::result::Result<V, L::Error> {
        let snapshot = self.config.snapshot();

        if !snapshot.options.is_enabled() {
            self.sync_if_stale(&snapshot);
            return self.load(key);
        }

        if let Some(value) = self.lookup(key, &snapshot) {
            return Ok(value);
        }

        let value = self.load(key)?;
        self.remember(key, value.clone(), &snapshot);
        Ok(value)
    }

    fn load(&self, key: &K) -> std::result::Result<V, L::Error> {
        let result = self.loader.load(key);
        self.record_load(result.is_ok());
        result
    }
}

impl<K, V, L> CachedFetcher<K, V, L>
where
    K: Hash + Eq + Clone,
    V: Clone,
    L: AsyncLoader<K, V>,
{
    // == Fetch For Key (async) ==
    /// Async counterpart of `fetch_for_key`. No lock is held across the
    /// loader's await point.
    pub async fn fetch_for_key_async(&self, key: &K) -> std::result::Result<V, L::Error> {
        let snapshot = self.config.snapshot();

        if !snapshot.options.is_enabled() {
            self.sync_if_stale(&snapshot);
            let result = self.loader.load(key).await;
            self.record_load(result.is_ok());
            return result;
        }

        if let Some(value) = self.lookup(key, &snapshot) {
            return Ok(value);
        }

        let result = self.loader.load(key).await;
        self.record_load(result.is_ok());
        let value = result?;
        self.remember(key, value.clone(), &snapshot);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::config::Limit;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Client {
        id: u64,
    }

    /// Loader that counts its calls and fails for keys starting with '!'.
    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
    }

    impl CountingLoader {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Loader<String, Client> for CountingLoader {
        type Error = String;

        fn load(&self, key: &String) -> std::result::Result<Client, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.starts_with('!') {
                return Err(format!("no client for {}", key));
            }
            Ok(Client { id: 42 })
        }
    }

    fn fetcher(
        options: CacheOptions,
    ) -> (CachedFetcher<String, Client, CountingLoader>, ManualClock) {
        let clock = ManualClock::new();
        let config = Arc::new(CacheConfiguration::with_options(options).unwrap());
        let fetcher =
            CachedFetcher::with_clock(config, CountingLoader::default(), Arc::new(clock.clone()));
        (fetcher, clock)
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn test_disabled_calls_loader_every_time() {
        let (fetcher, _clock) = fetcher(CacheOptions::disabled());

        for _ in 0..3 {
            assert_eq!(fetcher.fetch_for_key(&key("123")).unwrap().id, 42);
        }

        assert_eq!(fetcher.loader().calls(), 3);
        assert_eq!(fetcher.cached_len(), 0);
        let stats = fetcher.stats();
        assert_eq!(stats.loads, 3);
        assert_eq!(stats.hits + stats.misses, 0, "disabled mode never consults the store");
    }

    #[test]
    fn test_enabled_serves_from_cache() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        assert_eq!(fetcher.fetch_for_key(&key("123")).unwrap().id, 42);
        assert_eq!(fetcher.fetch_for_key(&key("123")).unwrap().id, 42);

        assert_eq!(fetcher.loader().calls(), 1);
        let stats = fetcher.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_expired_entry_reloads() {
        let (fetcher, clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        fetcher.fetch_for_key(&key("123")).unwrap();
        clock.advance(Duration::from_secs(5));
        fetcher.fetch_for_key(&key("123")).unwrap();
        assert_eq!(fetcher.loader().calls(), 1);

        clock.advance(Duration::from_millis(1));
        fetcher.fetch_for_key(&key("123")).unwrap();
        assert_eq!(fetcher.loader().calls(), 2);
        assert_eq!(fetcher.stats().expirations, 1);
    }

    #[test]
    fn test_loader_error_propagates_and_is_not_cached() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        let err = fetcher.fetch_for_key(&key("!missing")).unwrap_err();
        assert_eq!(err, "no client for !missing");
        assert!(fetcher.fetch_for_key(&key("!missing")).is_err());

        assert_eq!(fetcher.loader().calls(), 2);
        assert_eq!(fetcher.cached_len(), 0);
        assert_eq!(fetcher.stats().load_failures, 2);
    }

    #[test]
    fn test_reset_to_defaults_stops_serving_cached_values() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        fetcher.fetch_for_key(&key("123")).unwrap();
        fetcher.reset_to_defaults();
        assert_eq!(fetcher.cached_len(), 0, "reset clears eagerly");

        fetcher.fetch_for_key(&key("123")).unwrap();
        fetcher.fetch_for_key(&key("123")).unwrap();
        assert_eq!(fetcher.loader().calls(), 3);
    }

    #[test]
    fn test_configure_through_fetcher_clears_store() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        fetcher.fetch_for_key(&key("123")).unwrap();
        fetcher
            .configure(|options| options.max_cache_size = Limit::Bounded(20))
            .unwrap();

        assert_eq!(fetcher.cached_len(), 0);
        fetcher.fetch_for_key(&key("123")).unwrap();
        assert_eq!(fetcher.loader().calls(), 2);
    }

    #[test]
    fn test_change_through_shared_config_is_picked_up() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));
        let config = Arc::clone(fetcher.config());

        fetcher.fetch_for_key(&key("123")).unwrap();
        config
            .configure(|options| options.max_cache_ttl = Limit::Bounded(Duration::from_secs(60)))
            .unwrap();

        // The old entry belongs to the previous bounds and is not served
        fetcher.fetch_for_key(&key("123")).unwrap();
        assert_eq!(fetcher.loader().calls(), 2);

        fetcher.fetch_for_key(&key("123")).unwrap();
        assert_eq!(fetcher.loader().calls(), 2);
    }

    #[test]
    fn test_shared_reset_clears_store_on_disabled_lookup() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(60), 100));
        let config = Arc::clone(fetcher.config());

        for i in 0..10 {
            fetcher.fetch_for_key(&format!("key-{}", i)).unwrap();
        }
        assert_eq!(fetcher.cached_len(), 10);

        config.reset_to_defaults();
        fetcher.fetch_for_key(&key("key-0")).unwrap();
        fetcher.fetch_for_key(&key("key-1")).unwrap();

        assert_eq!(fetcher.cached_len(), 0);
        assert_eq!(fetcher.loader().calls(), 12);
        assert_eq!(fetcher.stats().total_entries, 0);
    }

    #[test]
    fn test_ttl_only_caches_without_size_limit() {
        let (fetcher, clock) = fetcher(CacheOptions {
            max_cache_ttl: Limit::Bounded(Duration::from_secs(5)),
            max_cache_size: Limit::Disabled,
        });

        for i in 0..50 {
            fetcher.fetch_for_key(&format!("key-{}", i)).unwrap();
        }
        fetcher.fetch_for_key(&key("key-0")).unwrap();
        assert_eq!(fetcher.loader().calls(), 50);
        assert_eq!(fetcher.cached_len(), 50);
        assert_eq!(fetcher.stats().evictions, 0);

        clock.advance(Duration::from_secs(6));
        fetcher.fetch_for_key(&key("key-0")).unwrap();
        assert_eq!(fetcher.loader().calls(), 51);
    }

    #[test]
    fn test_size_only_caches_without_expiry() {
        let (fetcher, clock) = fetcher(CacheOptions {
            max_cache_ttl: Limit::Disabled,
            max_cache_size: Limit::Bounded(2),
        });

        fetcher.fetch_for_key(&key("a")).unwrap();
        clock.advance(Duration::from_secs(30 * 24 * 60 * 60));
        fetcher.fetch_for_key(&key("a")).unwrap();
        assert_eq!(fetcher.loader().calls(), 1);

        fetcher.fetch_for_key(&key("b")).unwrap();
        fetcher.fetch_for_key(&key("c")).unwrap();
        assert_eq!(fetcher.cached_len(), 2);
    }

    #[test]
    fn test_stats_survive_reconfiguration() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        fetcher.fetch_for_key(&key("a")).unwrap();
        fetcher.fetch_for_key(&key("a")).unwrap();
        fetcher.reset_to_defaults();

        let stats = fetcher.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (fetcher, _clock) = fetcher(CacheOptions::new(Duration::from_secs(5), 10));

        fetcher.fetch_for_key(&key("a")).unwrap();
        fetcher.fetch_for_key(&key("b")).unwrap();

        assert!(fetcher.invalidate(&key("a")));
        assert!(!fetcher.invalidate(&key("a")));
        assert_eq!(fetcher.cached_len(), 1);

        fetcher.clear();
        assert_eq!(fetcher.cached_len(), 0);

        fetcher.fetch_for_key(&key("b")).unwrap();
        assert_eq!(fetcher.loader().calls(), 3);
    }

    #[test]
    fn test_closure_loader() {
        let config = Arc::new(
            CacheConfiguration::with_options(CacheOptions::new(Duration::from_secs(5), 10))
                .unwrap(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = CachedFetcher::new(config, move |key: &u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(key * 10)
        });

        assert_eq!(fetcher.fetch_for_key(&4), Ok(40));
        assert_eq!(fetcher.fetch_for_key(&4), Ok(40));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_fetch_serves_from_cache() {
        let config = Arc::new(
            CacheConfiguration::with_options(CacheOptions::new(Duration::from_secs(5), 10))
                .unwrap(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = CachedFetcher::new(config, move |key: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            let key = key.clone();
            async move {
                tokio::task::yield_now().await;
                if key.is_empty() {
                    Err("empty key".to_string())
                } else {
                    Ok(Client { id: 42 })
                }
            }
        });

        assert_eq!(fetcher.fetch_for_key_async(&key("123")).await.unwrap().id, 42);
        assert_eq!(fetcher.fetch_for_key_async(&key("123")).await.unwrap().id, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(fetcher.fetch_for_key_async(&key("")).await.is_err());
        assert!(fetcher.fetch_for_key_async(&key("")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetcher.stats().load_failures, 2);
    }

    #[tokio::test]
    async fn test_async_fetch_disabled_passthrough() {
        let config = Arc::new(CacheConfiguration::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = CachedFetcher::new(config, move |_key: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(Client { id: 42 }) }
        });

        fetcher.fetch_for_key_async(&key("123")).await.unwrap();
        fetcher.fetch_for_key_async(&key("123")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_disabled_lookup_clears_stale_store() {
        let config = Arc::new(
            CacheConfiguration::with_options(CacheOptions::new(Duration::from_secs(60), 100))
                .unwrap(),
        );
        let fetcher = CachedFetcher::new(Arc::clone(&config), |_key: &String| async move {
            Ok::<_, String>(Client { id: 42 })
        });

        for i in 0..10 {
            fetcher.fetch_for_key_async(&format!("key-{}", i)).await.unwrap();
        }
        assert_eq!(fetcher.cached_len(), 10);

        config.reset_to_defaults();
        fetcher.fetch_for_key_async(&key("key-0")).await.unwrap();

        assert_eq!(fetcher.cached_len(), 0);
        assert_eq!(fetcher.stats().loads, 11);
    }
}
