//! Configuration Module
//!
//! Holds the two cache tunables (entry lifetime and entry count), their
//! disabled-by-default state, and the shared configuration object that
//! fetchers read on every lookup.

use std::env;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{CacheError, Result};

// == Public Constants ==
/// Longest entry lifetime accepted by `configure` (one year)
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Largest entry capacity accepted by `configure`
pub const MAX_CACHE_SIZE: usize = 10_000_000;

/// Environment variable holding the entry lifetime in seconds
pub const TTL_ENV_VAR: &str = "FETCH_CACHE_MAX_TTL_SECS";

/// Environment variable holding the entry capacity
pub const SIZE_ENV_VAR: &str = "FETCH_CACHE_MAX_SIZE";

// == Limit ==
/// A cache bound that is either switched off or set to a concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit<T> {
    /// No caching for this bound
    Disabled,
    /// Caching bounded by the given value
    Bounded(T),
}

impl<T> Default for Limit<T> {
    fn default() -> Self {
        Limit::Disabled
    }
}

impl<T> Limit<T> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Limit::Disabled)
    }
}

impl Limit<Duration> {
    // == TTL From Seconds ==
    /// Builds a lifetime bound from a raw, possibly negative, second count.
    pub fn ttl_from_secs(secs: i64) -> Result<Self> {
        u64::try_from(secs)
            .map(|secs| Limit::Bounded(Duration::from_secs(secs)))
            .map_err(|_| CacheError::InvalidTtl(format!("must not be negative, got {}", secs)))
    }
}

impl Limit<usize> {
    // == Size From Integer ==
    /// Builds a capacity bound from a raw, possibly negative, entry count.
    pub fn size_from_i64(size: i64) -> Result<Self> {
        usize::try_from(size)
            .map(Limit::Bounded)
            .map_err(|_| CacheError::InvalidSize(format!("must not be negative, got {}", size)))
    }
}

// == Cache Options ==
/// The pair of tunables controlling whether and how much is cached.
///
/// Both bounds default to [`Limit::Disabled`], which switches caching off.
/// Bounding either one switches it on: a TTL alone caches without a size
/// limit, a size alone caches entries that never expire. A zero lifetime or
/// a zero capacity retains nothing and is treated like the disabled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheOptions {
    /// Maximum time an entry stays valid after insertion
    pub max_cache_ttl: Limit<Duration>,
    /// Maximum number of entries held at once
    pub max_cache_size: Limit<usize>,
}

impl CacheOptions {
    /// Creates options with both bounds set.
    pub fn new(max_cache_ttl: Duration, max_cache_size: usize) -> Self {
        Self {
            max_cache_ttl: Limit::Bounded(max_cache_ttl),
            max_cache_size: Limit::Bounded(max_cache_size),
        }
    }

    /// Creates options with caching switched off.
    pub fn disabled() -> Self {
        Self::default()
    }

    // == Enabled ==
    pub fn is_enabled(&self) -> bool {
        match (self.max_cache_ttl, self.max_cache_size) {
            (Limit::Disabled, Limit::Disabled) => false,
            (Limit::Bounded(ttl), _) if ttl.is_zero() => false,
            (_, Limit::Bounded(0)) => false,
            _ => true,
        }
    }

    // == Validate ==
    /// Rejects bounds that are too large to honor.
    pub fn validate(&self) -> Result<()> {
        if let Limit::Bounded(ttl) = self.max_cache_ttl {
            if ttl > MAX_CACHE_TTL {
                return Err(CacheError::InvalidTtl(format!(
                    "{}s exceeds the maximum of {}s",
                    ttl.as_secs(),
                    MAX_CACHE_TTL.as_secs()
                )));
            }
        }

        if let Limit::Bounded(size) = self.max_cache_size {
            if size > MAX_CACHE_SIZE {
                return Err(CacheError::InvalidSize(format!(
                    "{} exceeds the maximum of {} entries",
                    size, MAX_CACHE_SIZE
                )));
            }
        }

        Ok(())
    }

    // == From Environment ==
    /// Loads options from environment variables.
    ///
    /// # Environment Variables
    /// - `FETCH_CACHE_MAX_TTL_SECS` - Entry lifetime in seconds (default: disabled)
    /// - `FETCH_CACHE_MAX_SIZE` - Maximum cached entries (default: disabled)
    ///
    /// A value that is present but unparsable or negative is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Loads options through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_cache_ttl = match read_integer(&lookup, TTL_ENV_VAR)? {
            Some((raw, secs)) => {
                Limit::ttl_from_secs(secs).map_err(|err| env_error(TTL_ENV_VAR, &raw, err))?
            }
            None => Limit::Disabled,
        };

        let max_cache_size = match read_integer(&lookup, SIZE_ENV_VAR)? {
            Some((raw, size)) => {
                Limit::size_from_i64(size).map_err(|err| env_error(SIZE_ENV_VAR, &raw, err))?
            }
            None => Limit::Disabled,
        };

        let options = Self {
            max_cache_ttl,
            max_cache_size,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Reads a variable as an integer. Unset and blank both mean "not configured".
fn read_integer<F>(lookup: &F, var: &str) -> Result<Option<(String, i64)>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };

    raw.trim()
        .parse::<i64>()
        .map(|value| Some((raw.clone(), value)))
        .map_err(|_| CacheError::InvalidEnv {
            var: var.to_string(),
            value: raw.clone(),
            reason: "not an integer".to_string(),
        })
}

fn env_error(var: &str, raw: &str, err: CacheError) -> CacheError {
    CacheError::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
        reason: err.to_string(),
    }
}

// == Config Snapshot ==
/// Options as seen at one instant, tagged with the generation they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigSnapshot {
    pub options: CacheOptions,
    /// Incremented on every configuration change
    pub generation: u64,
}

// == Cache Configuration ==
/// Shared, thread-safe cache configuration.
///
/// Fetchers hold it through an `Arc` and read it once per lookup. Every
/// change bumps the generation so that stores built from older bounds are
/// discarded before they can serve anything.
#[derive(Debug, Default)]
pub struct CacheConfiguration {
    state: RwLock<ConfigSnapshot>,
}

impl CacheConfiguration {
    // == Constructor ==
    /// Creates a configuration with caching disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration starting from the given options.
    pub fn with_options(options: CacheOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            state: RwLock::new(ConfigSnapshot {
                options,
                generation: 0,
            }),
        })
    }

    // == Configure ==
    /// Applies `f` to a copy of the current options and commits the result
    /// if it validates. On error the previous options stay in effect.
    pub fn configure<F>(&self, f: F) -> Result<CacheOptions>
    where
        F: FnOnce(&mut CacheOptions),
    {
        let mut state = self.state.write();
        let mut options = state.options;
        f(&mut options);
        options.validate()?;

        state.options = options;
        state.generation += 1;

        info!(
            "Cache configured: max_cache_ttl={:?}, max_cache_size={:?}, enabled={}",
            options.max_cache_ttl,
            options.max_cache_size,
            options.is_enabled()
        );
        Ok(options)
    }

    // == Reset To Defaults ==
    /// Switches caching off. Calling it repeatedly leaves the same state.
    pub fn reset_to_defaults(&self) {
        let mut state = self.state.write();
        state.options = CacheOptions::disabled();
        state.generation += 1;
        info!("Cache configuration reset to defaults (disabled)");
    }

    pub fn options(&self) -> CacheOptions {
        self.state.read().options
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        *self.state.read()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().options.is_enabled()
    }
}
