use crate::policy::{Limiter, PolicyError};
use crate::repository::clock::{Clock, SystemClock};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Separates key components. Components are not escaped, so callers should avoid values that
/// contain it; otherwise two different identities may share a key.
pub const KEY_DELIMITER: &str = ":";

const LOCK_MARKER: &str = "lock";

/// The identity of whatever is being throttled, e.g. `["login", "user:42"]`.
///
/// Components are used in order, verbatim, when building store keys.
pub trait ThrottleKey {
    fn values(&self) -> Vec<String>;
}

/// A [ThrottleKey] made up of arbitrary displayable values.
///
/// # Examples
///
/// ```
/// # use throttle_repository::repository::{SimpleThrottleKey, ThrottleKey};
/// let key = SimpleThrottleKey::new(["login"]).push(42);
/// assert_eq!(key.values(), vec!["login", "42"]);
/// ```
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct SimpleThrottleKey(Vec<String>);

impl SimpleThrottleKey {
    pub fn new<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        Self(values.into_iter().map(|v| v.to_string()).collect())
    }

    /// Append another component.
    pub fn push(mut self, value: impl Display) -> Self {
        self.0.push(value.to_string());
        self
    }
}

impl ThrottleKey for SimpleThrottleKey {
    fn values(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl<T: Display> ThrottleKey for [T] {
    fn values(&self) -> Vec<String> {
        self.iter().map(ToString::to_string).collect()
    }
}

impl<T: Display, const N: usize> ThrottleKey for [T; N] {
    fn values(&self) -> Vec<String> {
        self.as_slice().values()
    }
}

impl<T: Display> ThrottleKey for Vec<T> {
    fn values(&self) -> Vec<String> {
        self.as_slice().values()
    }
}

impl<K: ThrottleKey + ?Sized> ThrottleKey for &K {
    fn values(&self) -> Vec<String> {
        (**self).values()
    }
}

/// Derives store keys from a [ThrottleKey] and a [Limiter].
///
/// Keys are identical across processes for identical inputs, so that callers referring to the
/// same identity and policy always contend on the same counter.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    policy_identity: Vec<String>,
    clock: Arc<dyn Clock>,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(Vec::new(), Arc::new(SystemClock))
    }
}

impl KeyBuilder {
    /// # Arguments
    ///
    /// * `policy_identity`: Components prepended to every key, namespacing them by deployment or
    ///   tenant. May be empty.
    /// * `clock`: Source of the current second for one second periods.
    pub fn new(policy_identity: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy_identity,
            clock,
        }
    }

    pub fn policy_identity(&self) -> &[String] {
        &self.policy_identity
    }

    /// The key of the counter for `key` under `limiter`.
    ///
    /// A one second period gets the current Unix second appended, so that the counter rolls over
    /// exactly at second boundaries rather than whenever the store gets round to expiring it.
    pub fn count_key(&self, key: &dyn ThrottleKey, limiter: &Limiter) -> String {
        let mut values = self.base_values(key);
        values.push(friendly_duration(limiter.period()));
        if limiter.period() == Duration::from_secs(1) {
            values.push(self.clock.unix_seconds().to_string());
        }
        values.join(KEY_DELIMITER)
    }

    /// The key of the lock for `key` under `limiter`.
    ///
    /// Fails if the limiter has no lock duration.
    pub fn lock_key(
        &self,
        key: &dyn ThrottleKey,
        limiter: &Limiter,
    ) -> Result<String, PolicyError> {
        let lock_duration = limiter.require_lock_duration()?;
        let mut values = self.base_values(key);
        values.push(LOCK_MARKER.to_owned());
        values.push(friendly_duration(lock_duration));
        Ok(values.join(KEY_DELIMITER))
    }

    fn base_values(&self, key: &dyn ThrottleKey) -> Vec<String> {
        let mut values = self.policy_identity.clone();
        values.extend(key.values());
        values
    }
}

/// Formats a duration as e.g. `1d2h30m15s`, omitting zero components.
///
/// Sub-second precision is dropped; a duration under a second formats as an empty string.
pub fn friendly_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let components = [
        (secs / 86_400, "d"),
        (secs / 3_600 % 24, "h"),
        (secs / 60 % 60, "m"),
        (secs % 60, "s"),
    ];
    components
        .iter()
        .filter(|(value, _)| *value != 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect()
}
