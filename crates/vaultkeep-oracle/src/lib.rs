//! # vaultkeep-oracle
//!
//! Price feed client used to enrich performance records.
//!
//! Every feed is queried independently; a failing feed is reported in the
//! batch but never fails it. Oracle output is advisory: nothing here gates
//! the on-chain compound.
//!
//! ## Modules
//!
//! - [`hermes`]: Pyth Hermes HTTP source
//! - [`stub`]: Static price source for development and tests
//! - [`staleness`]: Staleness guard for fetched samples

pub mod hermes;
pub mod staleness;
pub mod stub;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use vaultkeep_types::{FeedId, PriceSample, Timestamp};

pub use hermes::HermesSource;
pub use staleness::StalenessGuard;
pub use stub::StaticPriceSource;

/// Error types for oracle operations.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Transport-level failure reaching the price service.
    #[error("network error: {0}")]
    Network(String),

    /// The request or the batch deadline elapsed.
    #[error("price request timed out")]
    Timeout,

    /// The price service answered with a non-success status.
    #[error("HTTP status {0}")]
    Http(u16),

    /// The response body could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The service has no data for the feed.
    #[error("feed not found: {0}")]
    FeedNotFound(String),

    /// Price is zero or negative.
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    /// Sample is older than the staleness threshold.
    #[error(
        "stale price for {feed}: published {published}, current {current}, threshold {threshold}"
    )]
    StaleData {
        /// The feed the sample belongs to.
        feed: String,
        /// Publish time of the sample.
        published: u64,
        /// Current timestamp.
        current: u64,
        /// Staleness threshold in seconds.
        threshold: u64,
    },
}

/// Convenience result type for oracle operations.
pub type Result<T> = std::result::Result<T, OracleError>;

/// A place price samples come from.
pub trait PriceSource: Send + Sync {
    /// Fetch the latest sample for one feed.
    fn get_price(&self, feed: &FeedId) -> impl Future<Output = Result<PriceSample>> + Send;
}

/// Source selected at startup from configuration.
#[derive(Debug)]
pub enum AnyPriceSource {
    Hermes(HermesSource),
    Static(StaticPriceSource),
}

impl PriceSource for AnyPriceSource {
    async fn get_price(&self, feed: &FeedId) -> Result<PriceSample> {
        match self {
            Self::Hermes(source) => source.get_price(feed).await,
            Self::Static(source) => source.get_price(feed).await,
        }
    }
}

/// A feed that produced no sample, and why.
#[derive(Debug)]
pub struct FeedFailure {
    pub feed: FeedId,
    pub error: OracleError,
}

/// Result of a batched lookup.
#[derive(Debug, Default)]
pub struct PriceBatch {
    /// One entry per requested feed; `None` when that feed failed.
    pub samples: BTreeMap<FeedId, Option<PriceSample>>,
    pub failures: Vec<FeedFailure>,
}

impl PriceBatch {
    pub fn sample(&self, feed: &FeedId) -> Option<&PriceSample> {
        self.samples.get(feed).and_then(Option::as_ref)
    }

    pub fn failed_feeds(&self) -> Vec<FeedId> {
        self.failures.iter().map(|f| f.feed.clone()).collect()
    }
}

/// Oracle timing settings.
#[derive(Debug, Clone, Copy)]
pub struct OracleSettings {
    /// Bound on a single feed request.
    pub request_timeout: Duration,
    /// Bound on the whole batch.
    pub batch_deadline: Duration,
    /// Maximum accepted sample age in seconds.
    pub max_staleness: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            batch_deadline: Duration::from_secs(10),
            max_staleness: staleness::STALENESS_THRESHOLD,
        }
    }
}

/// Batched price client with per-feed isolation.
#[derive(Debug)]
pub struct PriceOracle<S> {
    source: S,
    settings: OracleSettings,
    guard: StalenessGuard,
}

impl<S: PriceSource> PriceOracle<S> {
    pub fn new(source: S, settings: OracleSettings) -> Self {
        Self {
            source,
            settings,
            guard: StalenessGuard::new(settings.max_staleness),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch one feed, bounded by the request timeout and checked for
    /// staleness at `now`.
    pub async fn get_price(&self, feed: &FeedId, now: Timestamp) -> Result<PriceSample> {
        let deadline = Instant::now() + self.settings.request_timeout;
        self.fetch(feed, now, deadline).await
    }

    /// Fetch every feed concurrently.
    ///
    /// Each request is bounded by the request timeout and by the batch
    /// deadline, whichever comes first. Failures are collected, not raised.
    pub async fn get_prices(&self, feeds: &[FeedId], now: Timestamp) -> PriceBatch {
        let batch_deadline = Instant::now() + self.settings.batch_deadline;
        let request_deadline = Instant::now() + self.settings.request_timeout;
        let deadline = batch_deadline.min(request_deadline);

        let results = futures::future::join_all(
            feeds
                .iter()
                .map(|feed| async move { (feed, self.fetch(feed, now, deadline).await) }),
        )
        .await;

        let mut batch = PriceBatch::default();
        for (feed, result) in results {
            match result {
                Ok(sample) => {
                    batch.samples.insert(feed.clone(), Some(sample));
                }
                Err(error) => {
                    tracing::warn!(%feed, %error, "price feed failed");
                    batch.samples.insert(feed.clone(), None);
                    batch.failures.push(FeedFailure {
                        feed: feed.clone(),
                        error,
                    });
                }
            }
        }
        batch
    }

    async fn fetch(&self, feed: &FeedId, now: Timestamp, deadline: Instant) -> Result<PriceSample> {
        let sample = tokio::time::timeout_at(deadline, self.source.get_price(feed))
            .await
            .map_err(|_| OracleError::Timeout)??;
        self.guard.check(&sample, now)?;
        Ok(sample)
    }
}
