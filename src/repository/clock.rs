//! Wall clock abstraction, used for the per-second key bucket.

use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so the current second can be fixed in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Whole seconds elapsed since the Unix epoch.
    fn unix_seconds(&self) -> u64;
}

/// The system wall clock.
///
/// Every process contending on a counter derives the same bucket only if their clocks agree, so
/// hosts should be time-synchronised.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// A clock stuck at a given second.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn unix_seconds(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.unix_seconds() > 1_577_836_800);
    }
}
