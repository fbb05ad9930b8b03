//! Exponential backoff with jitter.
//!
//! ```text
//! delay(n) = min(max_delay, base * 2^(n-1))
//! sleep(n) = delay(n) / 2 + uniform(0, delay(n) / 2)
//! ```
//!
//! `n` is the 1-based number of the attempt that just failed. Half of the
//! delay is fixed so retries never collapse to zero, the other half spreads
//! concurrent retries apart.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded retry policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay after the given failed attempt.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay to sleep after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = ceiling.saturating_sub(half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        half + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let b = Backoff::new(10, Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(b.ceiling(1), Duration::from_millis(100));
        assert_eq!(b.ceiling(2), Duration::from_millis(200));
        assert_eq!(b.ceiling(3), Duration::from_millis(400));
        assert_eq!(b.ceiling(5), Duration::from_millis(1000));
        assert_eq!(b.ceiling(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_delay_within_bounds() {
        let b = Backoff::new(5, Duration::from_millis(200), Duration::from_secs(10));
        for attempt in 1..=5 {
            let ceiling = b.ceiling(attempt);
            for _ in 0..50 {
                let d = b.delay(attempt);
                assert!(d >= ceiling / 2, "{d:?} below half of {ceiling:?}");
                assert!(d <= ceiling, "{d:?} above {ceiling:?}");
            }
        }
    }

    #[test]
    fn test_allows_retry() {
        let b = Backoff::new(3, Duration::ZERO, Duration::ZERO);
        assert!(b.allows_retry(1));
        assert!(b.allows_retry(2));
        assert!(!b.allows_retry(3));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(Backoff::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_zero_delay() {
        let b = Backoff::new(3, Duration::ZERO, Duration::ZERO);
        assert_eq!(b.delay(2), Duration::ZERO);
    }
}
