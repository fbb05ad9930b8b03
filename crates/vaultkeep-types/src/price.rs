//! Price feed samples.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, TypeError};

/// A price feed identifier (Pyth: 32-byte hex id, `0x` prefix optional).
///
/// Stored lowercase without the prefix so that differently written ids for
/// the same feed compare equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedId(String);

impl FeedId {
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let trimmed = raw.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidFeedId(raw.to_string()));
        }
        Ok(Self(hex_part.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0)
    }
}

impl TryFrom<String> for FeedId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FeedId> for String {
    fn from(value: FeedId) -> Self {
        value.0
    }
}

/// A single price observation. Produced fresh per cycle and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub feed_id: FeedId,
    /// Price in quote units, exponent already applied.
    pub price: f64,
    /// Confidence interval in quote units.
    pub confidence: f64,
    /// Publish time of the observation.
    pub timestamp: Timestamp,
}

impl PriceSample {
    /// Build a sample from Pyth's fixed-point representation
    /// (`value * 10^expo`).
    pub fn from_fixed(feed_id: FeedId, price: i64, conf: u64, expo: i32, timestamp: Timestamp) -> Self {
        let scale = 10f64.powi(expo);
        Self {
            feed_id,
            price: price as f64 * scale,
            confidence: conf as f64 * scale,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_id_normalization() {
        let a = FeedId::parse("0xABcd").expect("parse");
        let b = FeedId::parse("abcd").expect("parse");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "0xabcd");
        assert!(FeedId::parse("0x").is_err());
        assert!(FeedId::parse("btc-usd").is_err());
    }

    #[test]
    fn test_from_fixed() {
        let feed = FeedId::parse("01").expect("parse");
        let sample = PriceSample::from_fixed(feed, 6_140_993_501, 3_045_630, -8, 1_717_632_000);
        assert!((sample.price - 61.409_935_01).abs() < 1e-9);
        assert!((sample.confidence - 0.030_456_3).abs() < 1e-9);
        assert_eq!(sample.timestamp, 1_717_632_000);
    }
}
