//! Fetch Module
//!
//! The entry point callers use: look a key up in the cache and fall back
//! to a caller-supplied loader on a miss.

mod fetcher;
mod loader;

pub use fetcher::CachedFetcher;
pub use loader::{AsyncLoader, Loader};
