//! Cycle scheduler.
//!
//! Every tick the scheduler claims the due vaults from the registry and
//! spawns one cycle task per vault. A semaphore bounds how many cycles run
//! at once; the registry claim keeps any vault from running twice.
//!
//! On shutdown no new cycles start. Running cycles get a grace period to
//! finish and are aborted after it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vaultkeep_chain::ChainClient;
use vaultkeep_crypto::Signer;
use vaultkeep_oracle::PriceSource;
use vaultkeep_types::{now_secs, Timestamp, VaultAddress};

use crate::cycle::{CycleOutcome, CycleReport, CycleRunner};
use crate::health::Health;
use crate::registry::{Completion, Registry};

/// Default time between scheduler ticks.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Default number of cycles allowed to run at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default time running cycles get to finish on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub concurrency: usize,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            concurrency: DEFAULT_CONCURRENCY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub struct Scheduler<C, S: ?Sized, P> {
    registry: Arc<Registry>,
    runner: Arc<CycleRunner<C, S, P>>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<CycleReport>,
    in_flight: HashMap<Id, VaultAddress>,
    health: Arc<Health>,
    config: SchedulerConfig,
}

impl<C, S, P> Scheduler<C, S, P>
where
    C: ChainClient + 'static,
    S: Signer + ?Sized + 'static,
    P: PriceSource + 'static,
{
    pub fn new(
        runner: Arc<CycleRunner<C, S, P>>,
        health: Arc<Health>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry: runner.registry().clone(),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            runner,
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            health,
            config,
        }
    }

    /// Number of cycles currently running or waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Claim the vaults due at `now` and start their cycles.
    ///
    /// Returns the number of cycles started.
    pub async fn dispatch_due(&mut self, now: Timestamp) -> usize {
        self.reap().await;
        self.health.record_tick(now);

        let claimed = self.registry.claim_due(now).await;
        let count = claimed.len();
        for vault in claimed {
            let runner = self.runner.clone();
            let permits = self.permits.clone();
            let address = vault.address.clone();
            debug!(vault = %address.short(), "dispatching cycle");

            let handle = self.tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                runner.run(vault, now).await
            });
            self.in_flight.insert(handle.id(), address);
        }
        count
    }

    /// Wait for every running cycle and return their reports.
    pub async fn drain(&mut self) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            if let Some(report) = self.finish(joined).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Tick until `shutdown` fires, then drain.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            vaults = self.registry.len(),
            tick = ?self.config.tick,
            concurrency = self.config.concurrency,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = self.dispatch_due(now_secs()).await;
                    if started > 0 {
                        info!(started, in_flight = self.in_flight(), "cycles dispatched");
                    }
                }
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.finish(joined).await;
                }
                _ = shutdown.recv() => {
                    info!(in_flight = self.in_flight(), "scheduler stopping");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, self.drain()).await.is_ok() {
            info!("scheduler stopped");
            return;
        }

        for vault in self.in_flight.values() {
            warn!(vault = %vault.short(), "aborting cycle after shutdown grace");
        }
        self.tasks.abort_all();
        self.drain().await;
        info!("scheduler stopped");
    }

    async fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.finish(joined).await;
        }
    }

    async fn finish(&mut self, joined: Result<(Id, CycleReport), JoinError>) -> Option<CycleReport> {
        match joined {
            Ok((id, report)) => {
                self.in_flight.remove(&id);
                log_report(&report);
                self.health.record(&report);
                Some(report)
            }
            Err(join_error) => {
                let vault = self.in_flight.remove(&join_error.id());
                if join_error.is_cancelled() {
                    self.health.record_aborted();
                } else {
                    error!(vault = ?vault.as_ref().map(VaultAddress::short), "cycle task panicked");
                }
                // Release the claim so the vault is not stuck in progress.
                if let Some(vault) = vault {
                    if let Err(e) = self
                        .registry
                        .mark_completed(&vault, Completion::Failed, now_secs())
                        .await
                    {
                        warn!(vault = %vault.short(), error = %e, "could not release vault");
                    }
                }
                None
            }
        }
    }
}

fn log_report(report: &CycleReport) {
    let vault = report.vault.short();
    let attempts = report.attempts.len();
    match report.outcome {
        CycleOutcome::Compounded => info!(
            %vault,
            attempts,
            digest = ?report.tx_ref.as_ref().map(|t| t.as_str()),
            missing_prices = report.failed_feeds.len(),
            "cycle compounded"
        ),
        CycleOutcome::Degraded => warn!(
            %vault,
            attempts,
            digest = ?report.tx_ref.as_ref().map(|t| t.as_str()),
            "cycle compounded but degraded"
        ),
        CycleOutcome::Failed(kind) => warn!(%vault, attempts, error = %kind, "cycle failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleSettings;
    use crate::retry::RetryController;
    use crate::store::Store;
    use vaultkeep_chain::scripted::{ScriptedChain, Step};
    use vaultkeep_chain::{Submitter, SubmitterConfig};
    use vaultkeep_crypto::Ed25519Signer;
    use vaultkeep_oracle::{OracleSettings, PriceOracle, StaticPriceSource};
    use vaultkeep_types::{Backoff, VaultStatus, SECS_PER_HOUR};

    type TestScheduler = Scheduler<ScriptedChain, Ed25519Signer, StaticPriceSource>;

    const INTERVAL: u64 = 4 * SECS_PER_HOUR;
    const T: u64 = 1_700_000_000;

    fn addr(n: u8) -> VaultAddress {
        VaultAddress::parse(&format!("0x{n:x}")).expect("address")
    }

    async fn scheduler(
        vaults: &[VaultAddress],
        submitter: SubmitterConfig,
        config: SchedulerConfig,
    ) -> (TestScheduler, Arc<ScriptedChain>, Arc<Health>) {
        let store = Store::new(vaultkeep_db::open_memory().expect("open"), Backoff::default());
        let registry = Arc::new(
            Registry::load(store, vaults, INTERVAL, None, T)
                .await
                .expect("load"),
        );
        let chain = Arc::new(ScriptedChain::new());
        let submitter = Arc::new(Submitter::new(
            chain.clone(),
            Arc::new(Ed25519Signer::from_bytes(&[5u8; 32])),
            submitter,
        ));
        let oracle = Arc::new(PriceOracle::new(
            StaticPriceSource::new(),
            OracleSettings::default(),
        ));
        let runner = Arc::new(CycleRunner::new(
            registry,
            submitter,
            oracle,
            RetryController::new(Backoff::default()),
            CycleSettings::default(),
        ));
        let health = Arc::new(Health::new(T));
        (
            Scheduler::new(runner, health.clone(), config),
            chain,
            health,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_and_drain() {
        let (mut s, chain, health) = scheduler(
            &[addr(1), addr(2)],
            SubmitterConfig::default(),
            SchedulerConfig::default(),
        )
        .await;

        assert_eq!(s.dispatch_due(T).await, 2);
        let reports = s.drain().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == CycleOutcome::Compounded));
        assert_eq!(chain.landed(&addr(1)).len(), 1);
        assert_eq!(health.snapshot().compounded, 2);

        // Not due again until the interval has passed.
        assert_eq!(s.dispatch_due(T + 60).await, 0);
        assert_eq!(s.dispatch_due(T + INTERVAL).await, 2);
        s.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_vault_is_not_dispatched_again() {
        let (mut s, chain, _) = scheduler(
            &[addr(1)],
            SubmitterConfig::default(),
            SchedulerConfig::default(),
        )
        .await;
        chain.set_execute_delay(Duration::from_secs(10));

        assert_eq!(s.dispatch_due(T).await, 1);
        assert_eq!(s.dispatch_due(T + 2 * INTERVAL).await, 0);
        assert_eq!(s.in_flight(), 1);

        let reports = s.drain().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(chain.executed(&addr(1)), 1);
        assert_eq!(chain.max_concurrent(&addr(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_serializes_cycles() {
        let (mut s, chain, _) = scheduler(
            &[addr(1), addr(2), addr(3)],
            SubmitterConfig::default(),
            SchedulerConfig {
                concurrency: 1,
                ..Default::default()
            },
        )
        .await;
        chain.set_execute_delay(Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        assert_eq!(s.dispatch_due(T).await, 3);
        assert_eq!(s.drain().await.len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_after_grace() {
        let (s, chain, health) = scheduler(
            &[addr(1)],
            SubmitterConfig {
                attempt_timeout: Duration::from_secs(3_600),
                ..Default::default()
            },
            SchedulerConfig {
                shutdown_grace: Duration::from_secs(1),
                ..Default::default()
            },
        )
        .await;
        chain.push(&addr(1), Step::Hang);
        let registry = s.registry.clone();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(s.run(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(chain.executed(&addr(1)), 1);

        tx.send(()).expect("send");
        handle.await.expect("scheduler task");

        assert_eq!(health.snapshot().aborted, 1);
        let vault = registry.get(&addr(1)).await.expect("vault");
        assert_eq!(vault.status, VaultStatus::Failed);
        assert_eq!(vault.last_compounded_at, None);
    }
}
