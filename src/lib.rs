//! Fetch Cache - A bounded, expiring cache in front of a keyed lookup
//!
//! Repeated lookups of the same key within the configured TTL reach the
//! underlying loader once. Caching is off until a TTL or a capacity is
//! configured, and switching it off again never serves stale values.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fetch_cache::{CacheConfiguration, CacheOptions, CachedFetcher};
//!
//! let config = Arc::new(
//!     CacheConfiguration::with_options(CacheOptions::new(Duration::from_secs(5), 10)).unwrap(),
//! );
//! let fetcher = CachedFetcher::new(config, |key: &String| Ok::<_, String>(key.len()));
//!
//! assert_eq!(fetcher.fetch_for_key(&"123".to_string()), Ok(3));
//! assert_eq!(fetcher.stats().loads, 1);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;

pub use cache::{CacheStats, CacheStore, Clock, ManualClock, SystemClock};
pub use config::{CacheConfiguration, CacheOptions, Limit};
pub use error::CacheError;
pub use fetch::{AsyncLoader, CachedFetcher, Loader};
