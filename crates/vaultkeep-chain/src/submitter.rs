//! Transaction Submitter.
//!
//! One call to [`Submitter::compound`] is one attempt:
//!
//! 1. preflight the signer's gas balance against the gas budget
//! 2. build the compound call through the node
//! 3. sign the intent digest
//! 4. submit and wait for local execution
//!
//! The whole attempt runs under a single timeout. When a network error or
//! timeout happens after the signed bytes were handed to the node, the
//! outcome is ambiguous: the transaction may have landed. Before reporting
//! such a failure the submitter looks for a matching transaction from the
//! signer to the vault since the cycle started, and reports success if one
//! is found.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use vaultkeep_crypto::{sui, Signer};
use vaultkeep_types::{Timestamp, TxRef, VaultAddress};

use crate::{ChainClient, ChainError, ChainEvent, Execution, LandedQuery, MoveCall, Result};

/// Default gas budget in MIST (0.05 SUI).
pub const DEFAULT_GAS_BUDGET: u64 = 50_000_000;

/// Default bound on one attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how the compound entrypoint is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterConfig {
    /// Shared package exposing the entrypoint. `None` calls each vault's own
    /// package with no arguments.
    pub package_id: Option<String>,
    pub module: String,
    pub function: String,
    pub gas_budget: u64,
    pub attempt_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            package_id: None,
            module: "vault".to_string(),
            function: "compound".to_string(),
            gas_budget: DEFAULT_GAS_BUDGET,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// A confirmed compound.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundReceipt {
    pub tx_ref: TxRef,
    /// Checkpoint time, when known.
    pub timestamp: Option<Timestamp>,
    pub events: Vec<ChainEvent>,
    /// Set when success was established by the confirmation check rather
    /// than by the submit response.
    pub confirmed_late: bool,
}

impl CompoundReceipt {
    fn from_execution(execution: Execution, confirmed_late: bool) -> Self {
        Self {
            tx_ref: execution.digest,
            timestamp: execution.timestamp,
            events: execution.events,
            confirmed_late,
        }
    }
}

/// Builds, signs and submits compound calls for one signer.
pub struct Submitter<C, S: ?Sized> {
    client: Arc<C>,
    signer: Arc<S>,
    sender: String,
    config: SubmitterConfig,
}

impl<C, S> Submitter<C, S>
where
    C: ChainClient,
    S: Signer + ?Sized,
{
    pub fn new(client: Arc<C>, signer: Arc<S>, config: SubmitterConfig) -> Self {
        let sender = sui::address(&signer.public_key());
        Self {
            client,
            signer,
            sender,
            config,
        }
    }

    /// Address the transactions are sent from.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// The Move call for `vault`.
    pub fn call_for(&self, vault: &VaultAddress) -> MoveCall {
        let (package, arguments) = match &self.config.package_id {
            Some(package) => (package.clone(), vec![Value::String(vault.to_string())]),
            None => (vault.to_string(), Vec::new()),
        };
        MoveCall {
            signer: self.sender.clone(),
            package,
            module: self.config.module.clone(),
            function: self.config.function.clone(),
            type_arguments: Vec::new(),
            arguments,
            gas_budget: self.config.gas_budget,
        }
    }

    /// Run one compound attempt for `vault`.
    ///
    /// `cycle_started_at` bounds the confirmation check: only transactions at
    /// or after it count as this cycle's compound.
    pub async fn compound(
        &self,
        vault: &VaultAddress,
        cycle_started_at: Timestamp,
    ) -> Result<CompoundReceipt> {
        let handed_over = AtomicBool::new(false);

        let outcome = match tokio::time::timeout(
            self.config.attempt_timeout,
            self.submit(vault, &handed_over),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout),
        };

        match outcome {
            Err(err) if err.is_retryable() && handed_over.load(Ordering::Acquire) => {
                self.resolve_ambiguous(vault, cycle_started_at, err).await
            }
            other => other,
        }
    }

    async fn submit(&self, vault: &VaultAddress, handed_over: &AtomicBool) -> Result<CompoundReceipt> {
        let balance = self.client.get_balance(&self.sender).await?;
        if balance < self.config.gas_budget {
            return Err(ChainError::InsufficientFunds(format!(
                "signer balance {balance} below gas budget {}",
                self.config.gas_budget
            )));
        }

        let call = self.call_for(vault);
        let tx_bytes = self.client.build_compound(&call).await?;
        let signature = sui::sign_transaction(self.signer.as_ref(), &tx_bytes)
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        debug!(vault = %vault.short(), bytes = tx_bytes.len(), "submitting compound");
        handed_over.store(true, Ordering::Release);
        let execution = self.client.execute(&tx_bytes, &signature).await?;

        Ok(CompoundReceipt::from_execution(execution, false))
    }

    async fn resolve_ambiguous(
        &self,
        vault: &VaultAddress,
        since: Timestamp,
        original: ChainError,
    ) -> Result<CompoundReceipt> {
        let call = self.call_for(vault);
        let query = LandedQuery {
            sender: self.sender.clone(),
            package: call.package,
            module: call.module,
            function: call.function,
            vault: vault.clone(),
            since,
        };

        let lookup = tokio::time::timeout(
            self.config.attempt_timeout,
            self.client.find_landed_compound(&query),
        )
        .await;

        match lookup {
            Ok(Ok(Some(execution))) => {
                info!(
                    vault = %vault.short(),
                    digest = %execution.digest,
                    error = %original,
                    "compound landed despite submit error"
                );
                Ok(CompoundReceipt::from_execution(execution, true))
            }
            Ok(Ok(None)) => Err(original),
            Ok(Err(check)) => {
                warn!(vault = %vault.short(), error = %check, "confirmation check failed");
                Err(original)
            }
            Err(_) => {
                warn!(vault = %vault.short(), "confirmation check timed out");
                Err(original)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedChain, Step};
    use vaultkeep_crypto::Ed25519Signer;

    fn vault() -> VaultAddress {
        VaultAddress::parse("0xbeef").expect("vault")
    }

    fn submitter(chain: Arc<ScriptedChain>) -> Submitter<ScriptedChain, Ed25519Signer> {
        Submitter::new(
            chain,
            Arc::new(Ed25519Signer::from_bytes(&[7u8; 32])),
            SubmitterConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_successful_compound() {
        let chain = Arc::new(ScriptedChain::new());
        let s = submitter(chain.clone());

        let receipt = s.compound(&vault(), 0).await.expect("compound");
        assert!(!receipt.confirmed_late);
        assert_eq!(chain.executed(&vault()), 1);
        assert_eq!(chain.landed(&vault()), vec![receipt.tx_ref]);
    }

    #[tokio::test]
    async fn test_call_targets() {
        let chain = Arc::new(ScriptedChain::new());
        let own = submitter(chain.clone()).call_for(&vault());
        assert_eq!(own.package, vault().to_string());
        assert!(own.arguments.is_empty());
        assert_eq!((own.module.as_str(), own.function.as_str()), ("vault", "compound"));

        let shared = Submitter::new(
            chain,
            Arc::new(Ed25519Signer::from_bytes(&[7u8; 32])),
            SubmitterConfig {
                package_id: Some("0x2a".into()),
                ..Default::default()
            },
        )
        .call_for(&vault());
        assert_eq!(shared.package, "0x2a");
        assert_eq!(shared.arguments, vec![Value::String(vault().to_string())]);
    }

    #[tokio::test]
    async fn test_low_balance_is_insufficient_funds() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_balance(10);
        let s = submitter(chain.clone());

        let err = s.compound(&vault(), 0).await.expect_err("no gas");
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
        assert_eq!(chain.executed(&vault()), 0);
    }

    #[tokio::test]
    async fn test_rejected_is_not_confirmed() {
        let chain = Arc::new(ScriptedChain::new());
        chain.push(&vault(), Step::Fail(ChainError::ContractRejected("abort".into())));
        let s = submitter(chain.clone());

        let err = s.compound(&vault(), 0).await.expect_err("rejected");
        assert!(matches!(err, ChainError::ContractRejected(_)));
        assert_eq!(chain.landing_checks(), 0);
    }

    #[tokio::test]
    async fn test_lost_response_confirmed_by_check() {
        let chain = Arc::new(ScriptedChain::new());
        chain.push(&vault(), Step::LandThenFail(ChainError::Network("reset".into())));
        let s = submitter(chain.clone());

        let receipt = s.compound(&vault(), 0).await.expect("confirmed");
        assert!(receipt.confirmed_late);
        assert_eq!(chain.landing_checks(), 1);
        assert_eq!(chain.landed(&vault()), vec![receipt.tx_ref]);
    }

    #[tokio::test]
    async fn test_network_error_not_landed_stays_retryable() {
        let chain = Arc::new(ScriptedChain::new());
        chain.push(&vault(), Step::Fail(ChainError::Network("reset".into())));
        let s = submitter(chain.clone());

        let err = s.compound(&vault(), 0).await.expect_err("network");
        assert_eq!(err.kind(), vaultkeep_types::ErrorKind::NetworkError);
        assert_eq!(chain.landing_checks(), 1);
    }

    #[tokio::test]
    async fn test_landed_before_cycle_start_ignored() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_clock(100);
        let s = submitter(chain.clone());
        s.compound(&vault(), 100).await.expect("first cycle");

        chain.set_clock(200);
        chain.push(&vault(), Step::Fail(ChainError::Network("reset".into())));
        let err = s.compound(&vault(), 150).await.expect_err("older landing ignored");
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let chain = Arc::new(ScriptedChain::new());
        chain.push(&vault(), Step::Hang);
        let s = Submitter::new(
            chain.clone(),
            Arc::new(Ed25519Signer::from_bytes(&[7u8; 32])),
            SubmitterConfig {
                attempt_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let err = s.compound(&vault(), 0).await.expect_err("timeout");
        assert_eq!(err, ChainError::Timeout);
        assert_eq!(chain.landing_checks(), 1);
    }

    #[test]
    fn test_sender_matches_signer_address() {
        let signer = Arc::new(Ed25519Signer::from_bytes(&[7u8; 32]));
        let expected = sui::address(&signer.public_key());
        let s = Submitter::new(Arc::new(ScriptedChain::new()), signer, SubmitterConfig::default());
        assert_eq!(s.sender(), expected);
    }
}
