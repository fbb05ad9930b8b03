//! # vaultkeep-types
//!
//! Shared domain types used across the vaultkeep workspace: vaults and their
//! compounding status, compound attempts, price samples, performance records,
//! the closed set of submission error kinds, and the backoff policy shared by
//! every retrying layer.

pub mod attempt;
pub mod backoff;
pub mod performance;
pub mod price;
pub mod vault;

pub use attempt::{AttemptOutcome, CompoundAttempt, ErrorKind, TxRef};
pub use backoff::Backoff;
pub use performance::{PerformanceMetrics, PerformanceRecord};
pub use price::{FeedId, PriceSample};
pub use vault::{Vault, VaultAddress, VaultStatus};

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Seconds per hour.
pub const SECS_PER_HOUR: u64 = 60 * 60;

/// Seconds per (365-day) year, used to annualise yields.
pub const SECS_PER_YEAR: u64 = 365 * 24 * SECS_PER_HOUR;

/// Errors raised while parsing domain identifiers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid vault address: {0}")]
    InvalidAddress(String),

    #[error("invalid feed id: {0}")]
    InvalidFeedId(String),

    #[error("unknown vault status: {0}")]
    UnknownStatus(String),
}

/// Current wall-clock time as a Unix timestamp.
pub fn now_secs() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_recent() {
        // Anything after 2023-11-14 is plausible.
        assert!(now_secs() > 1_700_000_000);
    }

    #[test]
    fn test_year_constant() {
        assert_eq!(SECS_PER_YEAR, 31_536_000);
    }
}
