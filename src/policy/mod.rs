use std::time::Duration;
use thiserror::Error;

/// Reasons a [Limiter] cannot be built or cannot be used for an operation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum PolicyError {
    #[error("Limiter has no limit configured")]
    MissingLimit,
    #[error("Limiter limit must be greater than zero")]
    ZeroLimit,
    #[error("Limiter has no period configured")]
    MissingPeriod,
    #[error("Limiter period must be greater than zero")]
    ZeroPeriod,
    #[error("Limiter lock duration must be greater than zero")]
    ZeroLockDuration,
    #[error("Limiter has no lock duration configured")]
    MissingLockDuration,
}

/// A counting policy: at most `limit` events per `period`, optionally followed by a
/// cooldown lock lasting `lock_duration`.
///
/// Construct with [Limiter::builder()], which guarantees the limit and period are set and
/// non-zero.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Limiter {
    limit: u64,
    period: Duration,
    lock_duration: Option<Duration>,
}

impl Limiter {
    /// # Examples
    ///
    /// ```
    /// # use throttle_repository::policy::Limiter;
    /// # use std::time::Duration;
    /// let limiter = Limiter::builder()
    ///     .limit(5)
    ///     .over(Duration::from_secs(60))
    ///     .lock_for(Duration::from_secs(300))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(limiter.limit(), 5);
    /// ```
    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::default()
    }

    /// Maximum count permitted within the period.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The counting window.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn lock_duration(&self) -> Option<Duration> {
        self.lock_duration
    }

    /// The lock duration, for operations that cannot proceed without one.
    pub fn require_lock_duration(&self) -> Result<Duration, PolicyError> {
        self.lock_duration.ok_or(PolicyError::MissingLockDuration)
    }
}

#[derive(Debug, Default)]
pub struct LimiterBuilder {
    limit: Option<u64>,
    period: Option<Duration>,
    lock_duration: Option<Duration>,
}

impl LimiterBuilder {
    /// The maximum count permitted within the period.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The counting window.
    pub fn over(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Once the limit is exceeded, hold a lock for this long.
    pub fn lock_for(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = Some(lock_duration);
        self
    }

    pub fn build(self) -> Result<Limiter, PolicyError> {
        let limit = self.limit.ok_or(PolicyError::MissingLimit)?;
        if limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        let period = self.period.ok_or(PolicyError::MissingPeriod)?;
        if period.is_zero() {
            return Err(PolicyError::ZeroPeriod);
        }
        if self.lock_duration.is_some_and(|d| d.is_zero()) {
            return Err(PolicyError::ZeroLockDuration);
        }
        Ok(Limiter {
            limit,
            period,
            lock_duration: self.lock_duration,
        })
    }
}
