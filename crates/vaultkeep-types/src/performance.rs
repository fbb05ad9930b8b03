//! Performance records written after each successful compound.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{FeedId, PriceSample, Timestamp, TxRef};

/// Metrics derived from a compound cycle.
///
/// Every field is optional: a vault-state read or price lookup that fails
/// after the on-chain action succeeded leaves a gap rather than aborting the
/// record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Total value locked, in the vault asset's base units.
    pub tvl: Option<u64>,
    /// TVL valued in quote currency via the valuation feed.
    pub tvl_quote: Option<f64>,
    /// Effective annualised yield (0.05 = 5%).
    pub apy: Option<f64>,
    /// Yield compounded by this cycle, in base units.
    pub earned: Option<u64>,
}

/// An append-only performance sample for one vault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub vault_id: i64,
    pub timestamp: Timestamp,
    /// The compound transaction this record describes.
    pub tx_ref: TxRef,
    pub metrics: PerformanceMetrics,
    /// One entry per configured feed; `None` when the feed failed.
    pub prices: BTreeMap<FeedId, Option<PriceSample>>,
}

impl PerformanceRecord {
    /// The sample for `feed`, if it was configured and fetched.
    pub fn price(&self, feed: &FeedId) -> Option<&PriceSample> {
        self.prices.get(feed).and_then(Option::as_ref)
    }

    /// Feeds that were configured but absent from this record.
    pub fn missing_feeds(&self) -> Vec<&FeedId> {
        self.prices
            .iter()
            .filter(|(_, sample)| sample.is_none())
            .map(|(feed, _)| feed)
            .collect()
    }
}
