#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use std::future::Future;
use std::time::Duration;

/// Describes an atomic key-value store that throttle counters and locks are kept in.
///
/// The store is the only point of coordination between processes, so [ThrottleStore::increment]
/// must be atomic and linearizable per key: concurrent increments must all be applied, and each
/// caller must observe a distinct result.
///
/// A ThrottleStore is required to implement [Clone], usually this means wrapping your client
/// within an [Arc](std::sync::Arc), although many connection managers already do so internally;
/// there is no need to wrap it twice.
pub trait ThrottleStore: Clone {
    type Error;

    /// Read the value stored at `key` as text.
    ///
    /// Returns [None] if the key is absent (or has expired), or if its value is not valid text.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, Self::Error>>;

    /// Atomically add `delta` to the unsigned integer stored at `key`, returning the new value.
    ///
    /// If the key is absent it is created holding `initial`, expiring after `ttl`, and `initial`
    /// is returned. An existing key keeps its current expiry.
    ///
    /// # Arguments
    ///
    /// * `key`: The key of the counter.
    /// * `delta`: Amount added to an existing counter.
    /// * `initial`: Value of a newly created counter.
    /// * `ttl`: Lifetime of a newly created counter.
    fn increment(
        &self,
        key: &str,
        delta: u64,
        initial: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<u64, Self::Error>>;

    /// Check for the presence of `key`, returning its raw value if it is present.
    fn try_get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>>;

    /// Delete `key`, regardless of its expiry. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), Self::Error>>;
}
