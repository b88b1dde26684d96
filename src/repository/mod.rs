pub mod clock;
mod key;

pub use clock::{Clock, FixedClock, SystemClock};
pub use key::{friendly_duration, KeyBuilder, SimpleThrottleKey, ThrottleKey, KEY_DELIMITER};

use crate::backend::ThrottleStore;
use crate::policy::{Limiter, PolicyError};
use actix_web::{HttpResponse, ResponseError};
use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error<E> {
    /// The store could not be reached, or rejected the operation. Never retried.
    #[error("Throttle store error: {0}")]
    Store(#[source] E),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl<E> ResponseError for Error<E>
where
    E: std::error::Error + 'static,
{
    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().finish()
    }
}

/// Maintains throttle counters and locks, per identity and [Limiter].
///
/// A repository only reports counts and lock state; deciding whether to allow or deny, and when
/// to lock, is up to the caller. A typical caller increments, compares the count against
/// [Limiter::limit()], and sets a lock once it is exceeded.
#[async_trait(?Send)]
pub trait ThrottleRepository {
    type Error;

    /// The key of the counter for `key` under `limiter`.
    fn count_key(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> String;

    /// The key of the lock for `key` under `limiter`.
    fn lock_key(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> Result<String, PolicyError>;

    /// Count one more event, creating the counter (expiring after the limiter period) if needed.
    async fn increment_and_expire(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<(), Self::Error>;

    /// The current count, or [None] if no reliable count is known.
    async fn get_count(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<Option<i64>, Self::Error>;

    /// Whether a lock is currently held. Requires a lock duration.
    async fn lock_exists(&self, key: &dyn ThrottleKey, limiter: &Limiter)
        -> Result<bool, Self::Error>;

    /// Take a lock, lasting for the limiter lock duration. Requires a lock duration.
    async fn set_lock(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> Result<(), Self::Error>;

    /// Reset the counter early. Any lock is left in place.
    async fn remove_throttle(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<(), Self::Error>;
}

/// A [ThrottleRepository] on top of a [ThrottleStore].
#[derive(Clone)]
pub struct StoreThrottleRepository<S> {
    store: S,
    keys: KeyBuilder,
}

impl<S: ThrottleStore> StoreThrottleRepository<S> {
    /// Create a repository Builder.
    ///
    /// # Examples
    ///
    /// ```
    /// # use throttle_repository::backend::memory::InMemoryStore;
    /// # use throttle_repository::repository::StoreThrottleRepository;
    /// let store = InMemoryStore::builder().with_gc_interval(None).build();
    /// let repository = StoreThrottleRepository::builder(store)
    ///     .policy_identity(["prod", "eu"])
    ///     .build();
    /// ```
    pub fn builder(store: S) -> Builder<S> {
        Builder {
            store,
            policy_identity: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }
}

pub struct Builder<S> {
    store: S,
    policy_identity: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl<S: ThrottleStore> Builder<S> {
    /// Prepend these components to every key, e.g. to namespace keys by deployment or tenant.
    ///
    /// Fixed once the repository is built.
    pub fn policy_identity<I, T>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        self.policy_identity = values.into_iter().map(|v| v.to_string()).collect();
        self
    }

    /// Override the clock used for one second buckets.
    ///
    /// Defaults to [SystemClock].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> StoreThrottleRepository<S> {
        StoreThrottleRepository {
            store: self.store,
            keys: KeyBuilder::new(self.policy_identity, self.clock),
        }
    }
}

#[async_trait(?Send)]
impl<S: ThrottleStore> ThrottleRepository for StoreThrottleRepository<S> {
    type Error = Error<S::Error>;

    fn count_key(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> String {
        self.keys.count_key(key, limiter)
    }

    fn lock_key(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> Result<String, PolicyError> {
        self.keys.lock_key(key, limiter)
    }

    async fn increment_and_expire(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<(), Self::Error> {
        let id = self.keys.count_key(key, limiter);
        let period = limiter.period();
        let count = self
            .store
            .increment(&id, 1, 1, period)
            .await
            .map_err(Error::Store)?;
        log::trace!("Throttle counter {id} is now {count}");

        if count == 1 {
            // This call created the counter. Not every store applies the TTL on create, so apply
            // it again with a zero delta; the count is unchanged.
            self.store
                .increment(&id, 0, 1, period)
                .await
                .map_err(Error::Store)?;
            log::debug!("Created throttle counter {id}, expiring in {period:?}");
        }
        Ok(())
    }

    async fn get_count(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<Option<i64>, Self::Error> {
        let id = self.keys.count_key(key, limiter);
        let value = self.store.get(&id).await.map_err(Error::Store)?;
        log::trace!("Read throttle counter {id}: {value:?}");

        Ok(value.and_then(|value| match value.trim().parse::<i64>() {
            Ok(count) => Some(count),
            Err(e) => {
                log::warn!("Ignoring unparseable throttle count at {id}: {e}");
                None
            }
        }))
    }

    async fn lock_exists(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<bool, Self::Error> {
        let id = self.keys.lock_key(key, limiter)?;
        let exists = self
            .store
            .try_get(&id)
            .await
            .map_err(Error::Store)?
            .is_some();
        log::trace!("Throttle lock {id} exists: {exists}");
        Ok(exists)
    }

    async fn set_lock(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> Result<(), Self::Error> {
        let lock_duration = limiter.require_lock_duration()?;
        let id = self.keys.lock_key(key, limiter)?;
        // Only the presence of the lock matters, not its value
        self.store
            .increment(&id, 1, 1, lock_duration)
            .await
            .map_err(Error::Store)?;
        log::debug!("Set throttle lock {id} for {lock_duration:?}");
        Ok(())
    }

    async fn remove_throttle(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<(), Self::Error> {
        let id = self.keys.count_key(key, limiter);
        self.store.remove(&id).await.map_err(Error::Store)?;
        log::debug!("Removed throttle counter {id}");
        Ok(())
    }
}
