//! Loader Traits
//!
//! The seam between the cache and whatever it fronts. A loader resolves one
//! key to one value and may fail; the fetcher never retries or masks the
//! failure. Repeated loads of the same key are assumed to return equivalent
//! values.

use std::future::Future;

// == Loader ==
/// Resolves a cache miss synchronously.
pub trait Loader<K, V> {
    type Error;

    fn load(&self, key: &K) -> Result<V, Self::Error>;
}

impl<K, V, E, F> Loader<K, V> for F
where
    F: Fn(&K) -> Result<V, E>,
{
    type Error = E;

    fn load(&self, key: &K) -> Result<V, E> {
        self(key)
    }
}

// == Async Loader ==
/// Resolves a cache miss asynchronously.
///
/// Closures qualify when their future owns what it needs, e.g.
/// `|key: &String| { let key = key.clone(); async move { ... } }`.
pub trait AsyncLoader<K, V> {
    type Error;

    fn load(&self, key: &K) -> impl Future<Output = Result<V, Self::Error>> + Send;
}

impl<K, V, E, F, Fut> AsyncLoader<K, V> for F
where
    F: Fn(&K) -> Fut,
    Fut: Future<Output = Result<V, E>> + Send,
{
    type Error = E;

    fn load(&self, key: &K) -> impl Future<Output = Result<V, E>> + Send {
        self(key)
    }
}
