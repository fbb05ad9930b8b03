//! Compound attempts and the closed set of submission error kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, VaultAddress};

/// Reference to a landed on-chain transaction (its digest).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a compound submission failed.
///
/// This is the only input the retry controller uses to decide whether to
/// try again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkError,
    Timeout,
    InsufficientFunds,
    ContractRejected,
    SigningError,
}

impl ErrorKind {
    /// `NetworkError` and `Timeout` are transient; everything else is fatal
    /// for the current cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::InsufficientFunds => "insufficient_funds",
            Self::ContractRejected => "contract_rejected",
            Self::SigningError => "signing_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    RetryableFailure,
    FatalFailure,
}

/// One submission attempt within a compound cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundAttempt {
    pub vault: VaultAddress,
    /// 1-based.
    pub attempt: u32,
    pub started_at: Timestamp,
    pub outcome: AttemptOutcome,
    pub tx_ref: Option<TxRef>,
    pub error: Option<ErrorKind>,
}

impl CompoundAttempt {
    pub fn pending(vault: VaultAddress, attempt: u32, started_at: Timestamp) -> Self {
        Self {
            vault,
            attempt,
            started_at,
            outcome: AttemptOutcome::Pending,
            tx_ref: None,
            error: None,
        }
    }

    /// Finalize as a success.
    pub fn succeed(&mut self, tx_ref: TxRef) {
        self.outcome = AttemptOutcome::Success;
        self.tx_ref = Some(tx_ref);
        self.error = None;
    }

    /// Finalize as a failure, classified by `kind`.
    pub fn fail(&mut self, kind: ErrorKind) {
        self.outcome = if kind.is_retryable() {
            AttemptOutcome::RetryableFailure
        } else {
            AttemptOutcome::FatalFailure
        };
        self.tx_ref = None;
        self.error = Some(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::InsufficientFunds.is_retryable());
        assert!(!ErrorKind::ContractRejected.is_retryable());
        assert!(!ErrorKind::SigningError.is_retryable());
    }

    #[test]
    fn test_attempt_transitions() {
        let vault = VaultAddress::parse("0x1").expect("address");
        let mut attempt = CompoundAttempt::pending(vault, 1, 100);
        assert_eq!(attempt.outcome, AttemptOutcome::Pending);

        attempt.fail(ErrorKind::Timeout);
        assert_eq!(attempt.outcome, AttemptOutcome::RetryableFailure);
        assert_eq!(attempt.error, Some(ErrorKind::Timeout));

        attempt.fail(ErrorKind::ContractRejected);
        assert_eq!(attempt.outcome, AttemptOutcome::FatalFailure);

        attempt.succeed(TxRef("D1".into()));
        assert_eq!(attempt.outcome, AttemptOutcome::Success);
        assert!(attempt.error.is_none());
    }

    #[test]
    fn test_error_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::InsufficientFunds).expect("serialize");
        assert_eq!(json, "\"insufficient_funds\"");
    }
}
