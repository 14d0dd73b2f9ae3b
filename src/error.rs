//! Error types for the fetch cache
//!
//! Provides configuration error handling using thiserror. Loader errors are
//! never wrapped: they reach the caller exactly as the loader produced them.

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised while building or changing the cache configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The requested entry lifetime cannot be used
    #[error("Invalid max_cache_ttl: {0}")]
    InvalidTtl(String),

    /// The requested entry capacity cannot be used
    #[error("Invalid max_cache_size: {0}")]
    InvalidSize(String),

    /// An environment variable holds a value that does not parse
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },
}

// == Result Type Alias ==
/// Convenience Result type for configuration operations.
pub type Result<T> = std::result::Result<T, CacheError>;
