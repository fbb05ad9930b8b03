//! Static price source.
//!
//! Serves fixed prices without network access. Used for development
//! deployments without a Hermes endpoint and throughout the test suites.
//! Feeds can be switched off to simulate a failing upstream.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use vaultkeep_types::{now_secs, FeedId, PriceSample, Timestamp};

use crate::{OracleError, PriceSource, Result};

#[derive(Debug, Default)]
struct Inner {
    /// feed -> (price, confidence)
    prices: BTreeMap<FeedId, (f64, f64)>,
    unavailable: BTreeSet<FeedId>,
    publish_time: Option<Timestamp>,
}

/// A source returning configured prices.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    inner: RwLock<Inner>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source from `(feed, price)` pairs with zero confidence.
    pub fn with_prices(prices: impl IntoIterator<Item = (FeedId, f64)>) -> Self {
        let source = Self::new();
        for (feed, price) in prices {
            source.dev_set_price(feed, price, 0.0);
        }
        source
    }

    /// Set the price for a feed (development/testing only).
    pub fn dev_set_price(&self, feed: FeedId, price: f64, confidence: f64) {
        tracing::warn!(%feed, price, "static price source: price changed (dev only)");
        if let Ok(mut inner) = self.inner.write() {
            inner.unavailable.remove(&feed);
            inner.prices.insert(feed, (price, confidence));
        }
    }

    /// Make a feed fail until its price is set again.
    pub fn set_unavailable(&self, feed: FeedId) {
        if let Ok(mut inner) = self.inner.write() {
            inner.unavailable.insert(feed);
        }
    }

    /// Pin the publish time of served samples. Unpinned samples are stamped
    /// with the current wall-clock time.
    pub fn set_publish_time(&self, publish_time: Timestamp) {
        if let Ok(mut inner) = self.inner.write() {
            inner.publish_time = Some(publish_time);
        }
    }

    fn lookup(&self, feed: &FeedId) -> Result<PriceSample> {
        let inner = self
            .inner
            .read()
            .map_err(|_| OracleError::Network("static source lock poisoned".into()))?;

        if inner.unavailable.contains(feed) {
            return Err(OracleError::Network(format!("feed {feed} unavailable")));
        }
        let (price, confidence) = inner
            .prices
            .get(feed)
            .copied()
            .ok_or_else(|| OracleError::FeedNotFound(feed.to_string()))?;

        Ok(PriceSample {
            feed_id: feed.clone(),
            price,
            confidence,
            timestamp: inner.publish_time.unwrap_or_else(now_secs),
        })
    }
}

impl PriceSource for StaticPriceSource {
    async fn get_price(&self, feed: &FeedId) -> Result<PriceSample> {
        self.lookup(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(s: &str) -> FeedId {
        FeedId::parse(s).expect("feed")
    }

    #[tokio::test]
    async fn test_returns_configured_price() {
        let source = StaticPriceSource::with_prices([(feed("aa"), 2.5)]);
        source.set_publish_time(77);

        let sample = source.get_price(&feed("aa")).await.expect("price");
        assert_eq!(sample.price, 2.5);
        assert_eq!(sample.timestamp, 77);
        assert_eq!(sample.feed_id, feed("aa"));
    }

    #[tokio::test]
    async fn test_unknown_feed() {
        let source = StaticPriceSource::new();
        assert!(matches!(
            source.get_price(&feed("bb")).await,
            Err(OracleError::FeedNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_until_reset() {
        let source = StaticPriceSource::with_prices([(feed("aa"), 1.0)]);
        source.set_unavailable(feed("aa"));
        assert!(source.get_price(&feed("aa")).await.is_err());

        source.dev_set_price(feed("aa"), 1.1, 0.01);
        let sample = source.get_price(&feed("aa")).await.expect("restored");
        assert_eq!(sample.price, 1.1);
    }

    #[tokio::test]
    async fn test_unpinned_publish_time_is_now() {
        let source = StaticPriceSource::with_prices([(feed("aa"), 1.0)]);
        let sample = source.get_price(&feed("aa")).await.expect("price");
        assert!(now_secs().saturating_sub(sample.timestamp) <= 1);
    }
}
