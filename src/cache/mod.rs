//! Cache Module
//!
//! Provides the bounded, expiring key-value store that sits behind the
//! fetcher: TTL expiration checked on access and LRU eviction on insert.

mod clock;
mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::CacheStore;
