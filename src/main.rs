//! Fetch Cache demo - cached API client lookups from stdin
//!
//! Reads one API key per line, resolves it through a `CachedFetcher` in
//! front of a deliberately slow directory lookup, and prints one JSON line
//! per lookup. At end of input (or Ctrl+C) the cache statistics are printed.
//!
//! Caching is configured from `FETCH_CACHE_MAX_TTL_SECS` and
//! `FETCH_CACHE_MAX_SIZE`; with neither set every lookup hits the directory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fetch_cache::{AsyncLoader, CacheConfiguration, CacheOptions, CachedFetcher};

/// Latency of a single directory lookup
const LOOKUP_LATENCY: Duration = Duration::from_millis(100);

/// An API client record as the directory returns it.
#[derive(Debug, Clone, Serialize)]
struct ApiClient {
    id: u64,
    key: String,
    name: String,
    loaded_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
enum LookupError {
    #[error("No enabled API client for key {0:?}")]
    NotFound(String),
}

/// Stand-in for a database of API clients.
///
/// Every non-blank key resolves except those starting with `!`.
struct ClientDirectory {
    latency: Duration,
}

impl AsyncLoader<String, ApiClient> for ClientDirectory {
    type Error = LookupError;

    async fn load(&self, key: &String) -> Result<ApiClient, LookupError> {
        tokio::time::sleep(self.latency).await;

        if key.is_empty() || key.starts_with('!') {
            return Err(LookupError::NotFound(key.clone()));
        }

        // FNV-1a keeps ids stable across runs
        let id = key.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });

        Ok(ApiClient {
            id,
            key: key.clone(),
            name: format!("client-{}", key),
            loaded_at: Utc::now(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON lines
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetch_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = CacheOptions::from_env().context("Failed to load cache configuration")?;
    info!(
        "Configuration loaded: max_cache_ttl={:?}, max_cache_size={:?}, enabled={}",
        options.max_cache_ttl,
        options.max_cache_size,
        options.is_enabled()
    );

    let config = Arc::new(CacheConfiguration::with_options(options)?);
    let fetcher = CachedFetcher::new(
        config,
        ClientDirectory {
            latency: LOOKUP_LATENCY,
        },
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = &mut shutdown => {
                info!("Received Ctrl+C, stopping");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let key = line.trim().to_string();
        let started = Instant::now();
        let output = match fetcher.fetch_for_key_async(&key).await {
            Ok(client) => json!({
                "key": key,
                "client": client,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
            Err(err) => json!({
                "key": key,
                "error": err.to_string(),
            }),
        };
        println!("{}", serde_json::to_string(&output)?);
    }

    println!(
        "{}",
        serde_json::to_string(&json!({ "stats": fetcher.stats() }))?
    );
    Ok(())
}
