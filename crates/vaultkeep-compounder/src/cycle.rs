//! One compound cycle for one vault.
//!
//! ```text
//! Retry(Submitter.compound)
//!   ├─ failed  ──────────────────────────────▶ mark_completed(Failed)
//!   └─ landed ─▶ join(prices, vault object) ─▶ Recorder.record
//!                                                ├─ ok  ─▶ mark_completed(Succeeded)
//!                                                └─ err ─▶ mark_completed(Unrecorded)
//! ```
//!
//! Oracle and object-read failures only leave gaps in the record. Once the
//! compound has landed the cycle can no longer fail; at worst it is degraded.

use std::sync::Arc;

use serde::Serialize;
use tracing::{warn, Instrument};
use vaultkeep_chain::{ChainClient, Submitter};
use vaultkeep_crypto::Signer;
use vaultkeep_oracle::{PriceOracle, PriceSource};
use vaultkeep_types::{
    CompoundAttempt, ErrorKind, FeedId, PerformanceRecord, Timestamp, TxRef, Vault, VaultAddress,
};

use crate::metrics::{self, MetricsInput, Valuation};
use crate::recorder::Recorder;
use crate::registry::{Completion, Registry};
use crate::retry::RetryController;

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum CycleOutcome {
    /// Compounded, recorded, registry updated.
    Compounded,
    /// Compounded on-chain, but recording or the registry update failed.
    Degraded,
    /// Nothing landed.
    Failed(ErrorKind),
}

/// Summary of a finished cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub vault: VaultAddress,
    pub started_at: Timestamp,
    pub attempts: Vec<CompoundAttempt>,
    pub outcome: CycleOutcome,
    pub tx_ref: Option<TxRef>,
    pub failed_feeds: Vec<FeedId>,
}

/// What a cycle fetches and records besides the compound itself.
#[derive(Debug, Clone, Default)]
pub struct CycleSettings {
    pub feeds: Vec<FeedId>,
    pub valuation: Valuation,
}

/// Runs cycles against shared components.
pub struct CycleRunner<C, S: ?Sized, P> {
    registry: Arc<Registry>,
    submitter: Arc<Submitter<C, S>>,
    oracle: Arc<PriceOracle<P>>,
    recorder: Recorder,
    retry: RetryController,
    settings: CycleSettings,
}

impl<C, S, P> CycleRunner<C, S, P>
where
    C: ChainClient,
    S: Signer + ?Sized,
    P: PriceSource,
{
    pub fn new(
        registry: Arc<Registry>,
        submitter: Arc<Submitter<C, S>>,
        oracle: Arc<PriceOracle<P>>,
        retry: RetryController,
        settings: CycleSettings,
    ) -> Self {
        let recorder = Recorder::new(registry.store().clone());
        Self {
            registry,
            submitter,
            oracle,
            recorder,
            retry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run the cycle of a vault already claimed `in_progress`.
    ///
    /// `now` is the cycle start; it becomes the record timestamp and, on
    /// success, the new `last_compounded_at`.
    pub async fn run(&self, vault: Vault, now: Timestamp) -> CycleReport {
        let span = tracing::info_span!("cycle", vault = %vault.address.short(), now);
        self.run_inner(vault, now).instrument(span).await
    }

    async fn run_inner(&self, vault: Vault, now: Timestamp) -> CycleReport {
        let address = vault.address.clone();

        let retried = self
            .retry
            .run(&address, now, |_| self.submitter.compound(&address, now))
            .await;
        let mut report = CycleReport {
            vault: address.clone(),
            started_at: now,
            attempts: retried.attempts,
            outcome: CycleOutcome::Compounded,
            tx_ref: None,
            failed_feeds: Vec::new(),
        };

        let receipt = match retried.result {
            Ok(receipt) => receipt,
            Err(error) => {
                report.outcome = CycleOutcome::Failed(error.kind());
                if let Err(store_error) = self
                    .registry
                    .mark_completed(&address, Completion::Failed, now)
                    .await
                {
                    warn!(error = %store_error, "could not record failed cycle");
                }
                return report;
            }
        };
        report.tx_ref = Some(receipt.tx_ref.clone());

        let (batch, object) = tokio::join!(
            self.oracle.get_prices(&self.settings.feeds, now),
            self.submitter.client().get_object(&address),
        );
        report.failed_feeds = batch.failed_feeds();
        let object = object
            .map_err(|error| warn!(%error, "could not read vault object"))
            .ok();

        let previous = self
            .registry
            .store()
            .latest_vault_performance(vault.id)
            .await
            .map_err(|error| warn!(%error, "could not read previous record"))
            .ok()
            .flatten();

        let valuation_price = self
            .settings
            .valuation
            .feed
            .as_ref()
            .and_then(|feed| batch.sample(feed));
        let metrics = metrics::derive(&MetricsInput {
            object: object.as_ref(),
            events: &receipt.events,
            previous_tvl: previous.and_then(|p| p.metrics.tvl),
            previous_compounded_at: vault.last_compounded_at,
            now,
            valuation_price,
            decimals: self.settings.valuation.decimals,
        });

        let record = PerformanceRecord {
            vault_id: vault.id,
            timestamp: now,
            tx_ref: receipt.tx_ref.clone(),
            metrics,
            prices: batch.samples,
        };

        let completion = match self.recorder.record(&record, now).await {
            Ok(_) => Completion::Succeeded { compounded_at: now },
            Err(error) => {
                warn!(digest = %receipt.tx_ref, %error, "could not record performance");
                report.outcome = CycleOutcome::Degraded;
                Completion::Unrecorded { compounded_at: now }
            }
        };

        if let Err(error) = self.registry.mark_completed(&address, completion, now).await {
            warn!(digest = %receipt.tx_ref, %error, "could not complete cycle");
            report.outcome = CycleOutcome::Degraded;
        }

        report
    }
}
