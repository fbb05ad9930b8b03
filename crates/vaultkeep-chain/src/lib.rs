//! # vaultkeep-chain
//!
//! On-chain access for the compounding daemon.
//!
//! - [`ChainClient`] is the seam between the daemon and a chain node:
//!   balance and object reads, building the compound call, executing a signed
//!   transaction, and looking up a compound that may have landed without an
//!   answer reaching us.
//! - [`SuiRpcClient`] implements it over Sui JSON-RPC.
//! - `ScriptedChain` (feature `testing`) is a test double answering from
//!   memory.
//! - [`Submitter`] turns one compound request into a classified outcome.
//!
//! Errors are classified into [`ChainError`] at the client boundary; callers
//! decide on retries through [`ChainError::kind`] only.

pub mod rpc;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
pub mod submitter;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vaultkeep_types::{ErrorKind, Timestamp, TxRef, VaultAddress};

pub use rpc::SuiRpcClient;
#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedChain;
pub use submitter::{CompoundReceipt, Submitter, SubmitterConfig};

/// Outcome classes of on-chain submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("contract rejected call: {0}")]
    ContractRejected(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl ChainError {
    /// The closed kind used for retry decisions and attempt history.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkError,
            Self::Timeout => ErrorKind::Timeout,
            Self::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Self::ContractRejected(_) => ErrorKind::ContractRejected,
            Self::Signing(_) => ErrorKind::SigningError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// A Move call to build into a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    /// Sender address.
    pub signer: String,
    pub package: String,
    pub module: String,
    pub function: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Value>,
    /// Gas budget in MIST.
    pub gas_budget: u64,
}

/// An event emitted by an executed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Fully qualified Move event type.
    pub event_type: String,
    /// Decoded event fields.
    pub parsed: Value,
}

/// A transaction that executed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub digest: TxRef,
    /// Checkpoint time in seconds, when the node reported one.
    pub timestamp: Option<Timestamp>,
    pub events: Vec<ChainEvent>,
}

/// Filter for [`ChainClient::find_landed_compound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandedQuery {
    pub sender: String,
    pub package: String,
    pub module: String,
    pub function: String,
    /// The vault the call must target.
    pub vault: VaultAddress,
    /// Only transactions at or after this time count.
    pub since: Timestamp,
}

/// Chain node operations used by the daemon.
pub trait ChainClient: Send + Sync {
    /// Total gas-coin balance of `owner` in MIST.
    fn get_balance(&self, owner: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Object content (`data.content`) of `id`.
    fn get_object(&self, id: &VaultAddress) -> impl Future<Output = Result<Value>> + Send;

    /// Build unsigned transaction bytes for `call`.
    fn build_compound(&self, call: &MoveCall) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Submit signed bytes and wait for local execution.
    ///
    /// An executed-but-failed transaction is returned as
    /// [`ChainError::ContractRejected`] or [`ChainError::InsufficientFunds`].
    fn execute(
        &self,
        tx_bytes: &[u8],
        signature: &str,
    ) -> impl Future<Output = Result<Execution>> + Send;

    /// Most recent successful transaction matching `query`, if any.
    fn find_landed_compound(
        &self,
        query: &LandedQuery,
    ) -> impl Future<Output = Result<Option<Execution>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ChainError::Timeout.kind(), ErrorKind::Timeout);
        assert!(ChainError::Network("reset".into()).is_retryable());
        assert!(ChainError::Timeout.is_retryable());
        assert!(!ChainError::ContractRejected("abort".into()).is_retryable());
        assert!(!ChainError::InsufficientFunds("gas".into()).is_retryable());
        assert!(!ChainError::Signing("key".into()).is_retryable());
    }
}
