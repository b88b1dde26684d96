use crate::backend::ThrottleStore;
use actix_web::{HttpResponse, ResponseError};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

// Create the counter with its TTL if it is absent, otherwise add to it leaving the TTL alone.
// KEYS[1] = key, ARGV[1] = delta, ARGV[2] = initial, ARGV[3] = ttl (ms)
static INCREMENT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('SET', KEYS[1], ARGV[2], 'NX', 'PX', ARGV[3]) then
            return tonumber(ARGV[2])
        end
        return redis.call('INCRBY', KEYS[1], ARGV[1])
        ",
    )
});

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().finish()
    }
}

/// A [ThrottleStore] that keeps counters in Redis.
///
/// Redis applies the increment and the expiry for a new counter in a single script, so the
/// counter is never left without a TTL.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisStore {
    /// Create a RedisStore Builder.
    ///
    /// # Arguments
    ///
    /// * `connection`: A Redis connection manager.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use throttle_repository::backend::redis::RedisStore;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let store = RedisStore::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all keys given to this store.
    ///
    /// This may be useful when the Redis instance is being used for other purposes; the prefix is
    /// used as a 'namespace' to avoid collision with other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisStore {
        RedisStore {
            connection: self.connection,
            key_prefix: self.key_prefix,
        }
    }
}

// Redis rejects a zero expiry, and truncating would expire a counter early.
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000).max(1);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

impl ThrottleStore for RedisStore {
    type Error = Error;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let value: Option<Vec<u8>> = con.get(key.as_ref()).await?;
        Ok(value.and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    async fn increment(
        &self,
        key: &str,
        delta: u64,
        initial: u64,
        ttl: Duration,
    ) -> Result<u64, Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let count: u64 = INCREMENT_SCRIPT
            .key(key.as_ref())
            .arg(delta)
            .arg(initial)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut con)
            .await?;
        Ok(count)
    }

    async fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let value: Option<Vec<u8>> = con.get(key.as_ref()).await?;
        Ok(value)
    }

    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn remove(&self, key: &str) -> Result<(), Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        con.del::<_, ()>(key.as_ref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    // Each test must use non-overlapping keys (because the tests may be run concurrently)
    // Each test should also reset its key on each run, so that it is in a clean state.
    async fn make_store(clear_test_key: &str) -> Builder {
        let host = option_env!("REDIS_HOST").unwrap_or("127.0.0.1");
        let port = option_env!("REDIS_PORT").unwrap_or("6379");
        let client = redis::Client::open(format!("redis://{host}:{port}")).unwrap();
        let mut manager = ConnectionManager::new(client).await.unwrap();
        manager.del::<_, ()>(clear_test_key).await.unwrap();
        RedisStore::builder(manager)
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(10)), 10_000);
        // Rounded upwards
        assert_eq!(ttl_millis(Duration::from_micros(1500)), 2);
        assert_eq!(ttl_millis(Duration::from_nanos(1)), 1);
    }

    #[actix_web::test]
    async fn test_increment() {
        let store = make_store("test_increment").await.build();
        let mut con = store.connection.clone();
        assert_eq!(store.increment("test_increment", 1, 1, MINUTE).await.unwrap(), 1);
        let ttl: i64 = con.pttl("test_increment").await.unwrap();
        assert!(ttl > 0 && ttl <= 60_000);
        assert_eq!(store.increment("test_increment", 1, 0, MINUTE).await.unwrap(), 2);
        assert_eq!(
            store.get("test_increment").await.unwrap().as_deref(),
            Some("2")
        );
    }

    #[actix_web::test]
    async fn test_increment_keeps_ttl() {
        let store = make_store("test_increment_keeps_ttl").await.build();
        let mut con = store.connection.clone();
        store
            .increment("test_increment_keeps_ttl", 1, 1, Duration::from_secs(5))
            .await
            .unwrap();
        store
            .increment("test_increment_keeps_ttl", 1, 1, MINUTE)
            .await
            .unwrap();
        // The second, longer TTL must not have been applied
        let ttl: i64 = con.pttl("test_increment_keeps_ttl").await.unwrap();
        assert!(ttl > 0 && ttl <= 5_000);
    }

    #[actix_web::test]
    async fn test_expiry() {
        let store = make_store("test_expiry").await.build();
        store
            .increment("test_expiry", 1, 1, Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("test_expiry").await.unwrap(), None);
        assert_eq!(store.try_get("test_expiry").await.unwrap(), None);
    }

    #[actix_web::test]
    async fn test_non_numeric() {
        let store = make_store("test_non_numeric").await.build();
        let mut con = store.connection.clone();
        con.set::<_, _, ()>("test_non_numeric", "foo").await.unwrap();
        assert_eq!(
            store.get("test_non_numeric").await.unwrap().as_deref(),
            Some("foo")
        );
        assert!(store
            .increment("test_non_numeric", 1, 1, MINUTE)
            .await
            .is_err());
    }

    #[actix_web::test]
    async fn test_remove() {
        let store = make_store("test_remove").await.build();
        store.increment("test_remove", 1, 1, MINUTE).await.unwrap();
        assert!(store.try_get("test_remove").await.unwrap().is_some());
        store.remove("test_remove").await.unwrap();
        assert!(store.try_get("test_remove").await.unwrap().is_none());
        // Removing again is a no-op
        store.remove("test_remove").await.unwrap();
    }

    #[actix_web::test]
    async fn test_key_prefix() {
        let store = make_store("prefix:test_key_prefix")
            .await
            .key_prefix(Some("prefix:"))
            .build();
        let mut con = store.connection.clone();
        store
            .increment("test_key_prefix", 1, 1, MINUTE)
            .await
            .unwrap();
        assert!(con
            .exists::<_, bool>("prefix:test_key_prefix")
            .await
            .unwrap());

        store.remove("test_key_prefix").await.unwrap();
        assert!(!con
            .exists::<_, bool>("prefix:test_key_prefix")
            .await
            .unwrap());
    }
}
