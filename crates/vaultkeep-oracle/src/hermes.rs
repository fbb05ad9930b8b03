//! Pyth Hermes price source.
//!
//! ```text
//! GET {endpoint}/v2/updates/price/latest?ids[]={feed}&parsed=true
//! ```
//!
//! Prices arrive in fixed-point form (`price * 10^expo`) with the integer
//! fields encoded as JSON strings.

use std::time::Duration;

use serde::Deserialize;
use vaultkeep_types::{FeedId, PriceSample};

use crate::{OracleError, PriceSource, Result};

/// Default public Hermes endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://hermes.pyth.network";

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    parsed: Vec<ParsedUpdate>,
}

#[derive(Debug, Deserialize)]
struct ParsedUpdate {
    id: String,
    price: FixedPrice,
}

#[derive(Debug, Deserialize)]
struct FixedPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

/// HTTP client for a Hermes endpoint.
#[derive(Debug, Clone)]
pub struct HermesSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HermesSource {
    /// Build a source for `endpoint` with a per-request timeout.
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| OracleError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PriceSource for HermesSource {
    async fn get_price(&self, feed: &FeedId) -> Result<PriceSample> {
        let url = format!("{}/v2/updates/price/latest", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("ids[]", feed.to_string()), ("parsed", "true".to_string())])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(OracleError::FeedNotFound(feed.to_string()));
        }
        if !status.is_success() {
            return Err(OracleError::Http(status.as_u16()));
        }

        let body = response.text().await.map_err(classify)?;
        parse_latest(&body, feed)
    }
}

fn classify(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Network(err.to_string())
    }
}

/// Extract the sample for `feed` from a `/v2/updates/price/latest` body.
pub fn parse_latest(body: &str, feed: &FeedId) -> Result<PriceSample> {
    let response: LatestResponse =
        serde_json::from_str(body).map_err(|e| OracleError::Malformed(e.to_string()))?;

    let update = response
        .parsed
        .into_iter()
        .find(|u| FeedId::parse(&u.id).is_ok_and(|id| &id == feed))
        .ok_or_else(|| OracleError::FeedNotFound(feed.to_string()))?;

    let price: i64 = update
        .price
        .price
        .parse()
        .map_err(|_| OracleError::Malformed(format!("price {:?}", update.price.price)))?;
    let conf: u64 = update
        .price
        .conf
        .parse()
        .map_err(|_| OracleError::Malformed(format!("conf {:?}", update.price.conf)))?;
    if price <= 0 {
        return Err(OracleError::InvalidPrice(update.price.price));
    }
    let publish_time = u64::try_from(update.price.publish_time)
        .map_err(|_| OracleError::Malformed(format!("publish_time {}", update.price.publish_time)))?;

    Ok(PriceSample::from_fixed(
        feed.clone(),
        price,
        conf,
        update.price.expo,
        publish_time,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43";

    fn body(id: &str, price: &str) -> String {
        format!(
            r#"{{
                "binary": {{"encoding": "hex", "data": ["00"]}},
                "parsed": [{{
                    "id": "{id}",
                    "price": {{"price": "{price}", "conf": "2500000", "expo": -8, "publish_time": 1700000000}},
                    "ema_price": {{"price": "{price}", "conf": "2600000", "expo": -8, "publish_time": 1700000000}},
                    "metadata": {{"slot": 1, "proof_available_time": 1700000001, "prev_publish_time": 1699999999}}
                }}]
            }}"#
        )
    }

    #[test]
    fn test_parse_latest() {
        let feed = FeedId::parse(FEED).expect("feed");
        let sample = parse_latest(&body(FEED, "6523450000000"), &feed).expect("parse");

        assert_eq!(sample.feed_id, feed);
        assert!((sample.price - 65_234.5).abs() < 1e-6);
        assert!((sample.confidence - 0.025).abs() < 1e-9);
        assert_eq!(sample.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_parse_accepts_prefixed_id() {
        let feed = FeedId::parse(FEED).expect("feed");
        let prefixed = format!("0x{FEED}");
        assert!(parse_latest(&body(&prefixed, "100"), &feed).is_ok());
    }

    #[test]
    fn test_parse_missing_feed() {
        let feed = FeedId::parse("ff").expect("feed");
        assert!(matches!(
            parse_latest(&body(FEED, "100"), &feed),
            Err(OracleError::FeedNotFound(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_positive_price() {
        let feed = FeedId::parse(FEED).expect("feed");
        assert!(matches!(
            parse_latest(&body(FEED, "-5"), &feed),
            Err(OracleError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_parse_malformed_body() {
        let feed = FeedId::parse(FEED).expect("feed");
        assert!(matches!(
            parse_latest("not json", &feed),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_latest(&body(FEED, "abc"), &feed),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let source = HermesSource::new("https://hermes.example/", Duration::from_secs(5))
            .expect("client");
        assert_eq!(source.endpoint(), "https://hermes.example");
    }
}
