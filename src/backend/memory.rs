use crate::backend::ThrottleStore;
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use actix_web::{HttpResponse, ResponseError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot increment non-numeric value stored at {key}")]
    NonNumericValue { key: String },
    #[error("TTL unexpectedly large")]
    TtlTooLarge,
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().finish()
    }
}

/// A [ThrottleStore] that uses [Dashmap](dashmap::DashMap) to keep counters in memory.
///
/// Suitable for a single process, and for tests; counters are not shared between processes.
/// Expired entries are invisible to all operations, and are periodically reclaimed by a garbage
/// collector running on the actix runtime.
#[derive(Clone)]
pub struct InMemoryStore {
    map: Arc<DashMap<String, Value>>,
    _gc_handle: Option<Arc<GcHandle>>,
}

struct Value {
    expiry: Instant,
    data: String,
}

impl Value {
    fn live(&self, now: Instant) -> bool {
        self.expiry > now
    }
}

// Aborts the collector once the last clone of the store is gone.
struct GcHandle(JoinHandle<()>);

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl InMemoryStore {
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    /// Store an arbitrary value at `key`, replacing any existing entry and its expiry.
    pub fn set(&self, key: &str, data: impl Into<String>, ttl: Duration) -> Result<(), Error> {
        let expiry = Self::expiry(Instant::now(), ttl)?;
        self.map.insert(
            key.to_owned(),
            Value {
                expiry,
                data: data.into(),
            },
        );
        Ok(())
    }

    fn expiry(now: Instant, ttl: Duration) -> Result<Instant, Error> {
        now.checked_add(ttl).ok_or(Error::TtlTooLarge)
    }

    fn garbage_collector(map: Arc<DashMap<String, Value>>, interval: Duration) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                map.retain(|_k, v| v.live(now));
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl ThrottleStore for InMemoryStore {
    type Error = Error;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let now = Instant::now();
        Ok(self
            .map
            .get(key)
            .filter(|v| v.live(now))
            .map(|v| v.data.clone()))
    }

    async fn increment(
        &self,
        key: &str,
        delta: u64,
        initial: u64,
        ttl: Duration,
    ) -> Result<u64, Self::Error> {
        let now = Instant::now();
        match self.map.entry(key.to_owned()) {
            // Existing counter: add to it, leaving its expiry alone
            Entry::Occupied(mut occupied) if occupied.get().live(now) => {
                let value = occupied.get_mut();
                let current = value
                    .data
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::NonNumericValue {
                        key: key.to_owned(),
                    })?;
                let count = current.wrapping_add(delta);
                value.data = count.to_string();
                Ok(count)
            }
            // Expired, but not yet garbage collected: start again
            Entry::Occupied(mut occupied) => {
                occupied.insert(Value {
                    expiry: Self::expiry(now, ttl)?,
                    data: initial.to_string(),
                });
                Ok(initial)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Value {
                    expiry: Self::expiry(now, ttl)?,
                    data: initial.to_string(),
                });
                Ok(initial)
            }
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let now = Instant::now();
        Ok(self
            .map
            .get(key)
            .filter(|v| v.live(now))
            .map(|v| v.data.clone().into_bytes()))
    }

    async fn remove(&self, key: &str) -> Result<(), Self::Error> {
        self.map.remove(key);
        Ok(())
    }
}

pub struct InMemoryStoreBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryStoreBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection.
    ///
    /// The garbage collector periodically scans the internal map, removing expired entries.
    /// It is spawned on the actix runtime, so building a store with garbage collection enabled
    /// must happen inside one.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn build(self) -> InMemoryStore {
        let map = Arc::new(DashMap::<String, Value>::new());
        let gc_handle = self.gc_interval.map(|gc_interval| {
            Arc::new(GcHandle(InMemoryStore::garbage_collector(
                map.clone(),
                gc_interval,
            )))
        });
        InMemoryStore {
            map,
            _gc_handle: gc_handle,
        }
    }
}
