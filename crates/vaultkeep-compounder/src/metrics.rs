//! Performance metrics derivation.
//!
//! ```text
//! tvl       = vault object field (balance | total_assets | tvl)
//! earned    = compound event field (earned | amount | reward)
//!             else tvl - previous tvl
//! rate      = earned / (tvl - earned)
//! apy       = (1 + rate)^(SECS_PER_YEAR / elapsed) - 1
//! tvl_quote = tvl / 10^decimals * valuation price
//! ```
//!
//! Every input is optional; a missing input leaves the derived field empty.

use serde_json::Value;
use vaultkeep_chain::ChainEvent;
use vaultkeep_types::{FeedId, PerformanceMetrics, PriceSample, Timestamp, SECS_PER_YEAR};

/// Object fields holding the vault's total value.
const TVL_FIELDS: [&str; 3] = ["balance", "total_assets", "tvl"];

/// Event fields holding the compounded yield.
const EARNED_FIELDS: [&str; 3] = ["earned", "amount", "reward"];

/// How TVL is valued in quote currency.
#[derive(Debug, Clone, Default)]
pub struct Valuation {
    /// Feed pricing the vault asset. `None` disables quote valuation.
    pub feed: Option<FeedId>,
    /// Decimals of the vault asset's base unit.
    pub decimals: u32,
}

/// Inputs available after a compound.
#[derive(Debug, Default)]
pub struct MetricsInput<'a> {
    /// Vault object content (`data.content`).
    pub object: Option<&'a Value>,
    pub events: &'a [ChainEvent],
    /// TVL of the previous record.
    pub previous_tvl: Option<u64>,
    /// When the vault compounded before this cycle.
    pub previous_compounded_at: Option<Timestamp>,
    pub now: Timestamp,
    pub valuation_price: Option<&'a PriceSample>,
    pub decimals: u32,
}

/// Derive the metrics of one cycle.
pub fn derive(input: &MetricsInput<'_>) -> PerformanceMetrics {
    let tvl = input.object.and_then(tvl_from_object);

    let earned = earned_from_events(input.events).or_else(|| match (tvl, input.previous_tvl) {
        (Some(now), Some(before)) if now >= before => Some(now - before),
        _ => None,
    });

    let apy = match (tvl, earned, input.previous_compounded_at) {
        (Some(tvl), Some(earned), Some(before)) => annualise(tvl, earned, input.now.saturating_sub(before)),
        _ => None,
    };

    let tvl_quote = match (tvl, input.valuation_price) {
        (Some(tvl), Some(sample)) => {
            let value = tvl as f64 / 10f64.powi(input.decimals as i32) * sample.price;
            value.is_finite().then_some(value)
        }
        _ => None,
    };

    PerformanceMetrics {
        tvl,
        tvl_quote,
        apy,
        earned,
    }
}

fn annualise(tvl: u64, earned: u64, elapsed: u64) -> Option<f64> {
    let principal = tvl.checked_sub(earned)?;
    if principal == 0 || elapsed == 0 {
        return None;
    }
    let rate = earned as f64 / principal as f64;
    let periods = SECS_PER_YEAR as f64 / elapsed as f64;
    let apy = (1.0 + rate).powf(periods) - 1.0;
    apy.is_finite().then_some(apy)
}

/// Sui renders u64 fields as strings; accept numbers too.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        // Balance<T> may render as {"value": "..."}.
        Value::Object(map) => map.get("value").and_then(as_u64),
        _ => None,
    }
}

fn tvl_from_object(object: &Value) -> Option<u64> {
    let fields = object.get("fields")?;
    TVL_FIELDS
        .iter()
        .find_map(|name| fields.get(*name).and_then(as_u64))
}

fn earned_from_events(events: &[ChainEvent]) -> Option<u64> {
    events.iter().find_map(|event| {
        EARNED_FIELDS
            .iter()
            .find_map(|name| event.parsed.get(*name).and_then(as_u64))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vaultkeep_types::SECS_PER_HOUR;

    fn event(parsed: Value) -> ChainEvent {
        ChainEvent {
            event_type: "0x1::vault::Compounded".into(),
            parsed,
        }
    }

    #[test]
    fn test_all_inputs() {
        let object = json!({"fields": {"balance": "1010000000"}});
        let events = [event(json!({"earned": "10000000"}))];
        let price = PriceSample {
            feed_id: FeedId::parse("aa").expect("feed"),
            price: 2.0,
            confidence: 0.0,
            timestamp: 0,
        };

        let m = derive(&MetricsInput {
            object: Some(&object),
            events: &events,
            previous_tvl: Some(1_000_000_000),
            previous_compounded_at: Some(0),
            now: 4 * SECS_PER_HOUR,
            valuation_price: Some(&price),
            decimals: 9,
        });

        assert_eq!(m.tvl, Some(1_010_000_000));
        assert_eq!(m.earned, Some(10_000_000));
        assert!((m.tvl_quote.expect("quote") - 2.02).abs() < 1e-9);
        // 1% per 4h compounded 2190 times a year.
        let expected = 1.01f64.powf(2190.0) - 1.0;
        assert!((m.apy.expect("apy") - expected).abs() / expected < 1e-9);
    }

    #[test]
    fn test_earned_falls_back_to_tvl_delta() {
        let object = json!({"fields": {"total_assets": 1_050}});
        let m = derive(&MetricsInput {
            object: Some(&object),
            previous_tvl: Some(1_000),
            ..Default::default()
        });
        assert_eq!(m.tvl, Some(1_050));
        assert_eq!(m.earned, Some(50));
        assert_eq!(m.apy, None);
    }

    #[test]
    fn test_shrinking_tvl_has_no_earned() {
        let object = json!({"fields": {"tvl": "900"}});
        let m = derive(&MetricsInput {
            object: Some(&object),
            previous_tvl: Some(1_000),
            ..Default::default()
        });
        assert_eq!(m.earned, None);
    }

    #[test]
    fn test_nothing_known() {
        assert_eq!(derive(&MetricsInput::default()), PerformanceMetrics::default());
    }

    #[test]
    fn test_nested_balance_value() {
        let object = json!({"fields": {"balance": {"value": "77"}}});
        assert_eq!(tvl_from_object(&object), Some(77));
    }

    #[test]
    fn test_earned_from_alternate_field() {
        let events = [
            event(json!({"sender": "0x1"})),
            event(json!({"reward": 12})),
        ];
        assert_eq!(earned_from_events(&events), Some(12));
    }

    #[test]
    fn test_annualise_guards() {
        assert_eq!(annualise(100, 0, 0), None);
        assert_eq!(annualise(100, 100, 60), None);
        assert_eq!(annualise(100, 200, 60), None);
        let yearly = annualise(110, 10, SECS_PER_YEAR).expect("apy");
        assert!((yearly - 0.1).abs() < 1e-12);
    }
}
