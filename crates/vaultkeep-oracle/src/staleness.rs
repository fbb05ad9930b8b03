//! Staleness guard for price samples.
//!
//! A sample whose publish time lags the current time by more than the
//! threshold is rejected; the feed is then treated as failed for the batch.
//! Publish times slightly ahead of the local clock are accepted.

use vaultkeep_types::{PriceSample, Timestamp};

use crate::{OracleError, Result};

/// Default staleness threshold in seconds (5 minutes).
pub const STALENESS_THRESHOLD: u64 = 300;

/// Rejects samples older than a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessGuard {
    /// Maximum accepted age in seconds.
    threshold: u64,
}

impl Default for StalenessGuard {
    fn default() -> Self {
        Self::new(STALENESS_THRESHOLD)
    }
}

impl StalenessGuard {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// Return whether a sample published at `published` is stale at `now`.
    pub fn is_stale(&self, published: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(published) > self.threshold
    }

    /// Check a sample against the threshold.
    ///
    /// # Errors
    ///
    /// - [`OracleError::StaleData`] if the sample is too old
    pub fn check(&self, sample: &PriceSample, now: Timestamp) -> Result<()> {
        if self.is_stale(sample.timestamp, now) {
            return Err(OracleError::StaleData {
                feed: sample.feed_id.to_string(),
                published: sample.timestamp,
                current: now,
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    /// Return the configured threshold.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeep_types::FeedId;

    fn sample(ts: u64) -> PriceSample {
        PriceSample {
            feed_id: FeedId::parse("aa").expect("feed"),
            price: 1.0,
            confidence: 0.0,
            timestamp: ts,
        }
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(StalenessGuard::default().threshold(), STALENESS_THRESHOLD);
    }

    #[test]
    fn test_fresh_within_threshold() {
        let guard = StalenessGuard::new(60);
        guard.check(&sample(1000), 1060).expect("exactly at threshold");
    }

    #[test]
    fn test_stale_after_threshold() {
        let guard = StalenessGuard::new(60);
        let err = guard.check(&sample(1000), 1061).expect_err("stale");
        assert!(matches!(err, OracleError::StaleData { published: 1000, .. }));
    }

    #[test]
    fn test_future_publish_time_accepted() {
        let guard = StalenessGuard::new(60);
        assert!(!guard.is_stale(2000, 1000));
    }
}
