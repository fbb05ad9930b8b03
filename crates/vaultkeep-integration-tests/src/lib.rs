//! Shared harness for vaultkeep integration tests.
//!
//! Wires the real registry, cycle runner and scheduler against a
//! [`ScriptedChain`] and a [`StaticPriceSource`], so whole compound cycles
//! run in-process with a controllable clock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vaultkeep_chain::{ScriptedChain, Submitter, SubmitterConfig};
use vaultkeep_compounder::{
    CycleReport, CycleRunner, CycleSettings, Health, Registry, RetryController, Scheduler,
    SchedulerConfig, Store, Valuation,
};
use vaultkeep_crypto::Ed25519Signer;
use vaultkeep_oracle::{OracleSettings, PriceOracle, StaticPriceSource};
use vaultkeep_types::{
    Backoff, FeedId, PerformanceRecord, Timestamp, Vault, VaultAddress, SECS_PER_HOUR,
};

/// Base timestamp of every scenario.
pub const T: Timestamp = 1_700_000_000;

/// Compounding interval used by the harness.
pub const INTERVAL: u64 = 4 * SECS_PER_HOUR;

pub type TestScheduler = Scheduler<ScriptedChain, Ed25519Signer, StaticPriceSource>;

pub fn vault(n: u8) -> VaultAddress {
    VaultAddress::parse(&format!("0x{n:x}")).expect("vault address")
}

pub fn feed(hex: &str) -> FeedId {
    FeedId::parse(hex).expect("feed id")
}

/// Short retry schedule so retried scenarios stay quick.
pub fn backoff() -> Backoff {
    Backoff::new(3, Duration::from_millis(10), Duration::from_millis(100))
}

pub fn memory_store() -> Store {
    Store::new(vaultkeep_db::open_memory().expect("open memory db"), backoff())
}

/// A database file unique to one test, removed on drop.
pub struct TempDb {
    pub path: PathBuf,
}

impl TempDb {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "vaultkeep-{name}-{}-{}.db",
            std::process::id(),
            vaultkeep_types::now_secs()
        ));
        let _ = std::fs::remove_file(&path);
        Self { path }
    }

    pub fn open(&self) -> Store {
        Store::new(vaultkeep_db::open(&self.path).expect("open db file"), backoff())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(path));
        }
    }
}

/// Everything one scenario needs.
pub struct Harness {
    pub chain: Arc<ScriptedChain>,
    pub oracle: Arc<PriceOracle<StaticPriceSource>>,
    pub registry: Arc<Registry>,
    pub store: Store,
    pub health: Arc<Health>,
    pub scheduler: TestScheduler,
}

impl Harness {
    /// Load `vaults` from `store` at `now` and build a scheduler pricing
    /// `feeds`, valued against the first feed with 3 decimals.
    pub async fn start(store: Store, vaults: &[VaultAddress], feeds: &[FeedId], now: Timestamp) -> Self {
        Self::start_with(store, vaults, feeds, now, SchedulerConfig::default()).await
    }

    pub async fn start_with(
        store: Store,
        vaults: &[VaultAddress],
        feeds: &[FeedId],
        now: Timestamp,
        config: SchedulerConfig,
    ) -> Self {
        let registry = Arc::new(
            Registry::load(store.clone(), vaults, INTERVAL, None, now)
                .await
                .expect("load registry"),
        );

        let chain = Arc::new(ScriptedChain::new());
        chain.set_clock(now);
        for address in vaults {
            chain.set_vault(address, 1_000_000, 1_000);
        }

        let submitter = Arc::new(Submitter::new(
            chain.clone(),
            Arc::new(Ed25519Signer::from_bytes(&[9u8; 32])),
            SubmitterConfig::default(),
        ));
        let source = StaticPriceSource::new();
        source.set_publish_time(now);
        let oracle = Arc::new(PriceOracle::new(source, OracleSettings::default()));

        let runner = Arc::new(CycleRunner::new(
            registry.clone(),
            submitter,
            oracle.clone(),
            RetryController::new(backoff()),
            CycleSettings {
                feeds: feeds.to_vec(),
                valuation: Valuation {
                    feed: feeds.first().cloned(),
                    decimals: 3,
                },
            },
        ));
        let health = Arc::new(Health::new(now));
        let scheduler = Scheduler::new(runner, health.clone(), config);

        Self {
            chain,
            oracle,
            registry,
            store,
            health,
            scheduler,
        }
    }

    pub fn prices(&self) -> &StaticPriceSource {
        self.oracle.source()
    }

    /// Move the scenario clock to `now`, run every due cycle to completion
    /// and return their reports.
    pub async fn tick(&mut self, now: Timestamp) -> Vec<CycleReport> {
        self.chain.set_clock(now);
        self.prices().set_publish_time(now);
        self.scheduler.dispatch_due(now).await;
        self.scheduler.drain().await
    }

    pub async fn vault(&self, address: &VaultAddress) -> Vault {
        self.registry.get(address).await.expect("managed vault")
    }

    /// Stored records of a vault, oldest first.
    pub async fn records(&self, address: &VaultAddress) -> Vec<PerformanceRecord> {
        let vault = self.vault(address).await;
        self.store
            .get_vault_performance(vault.id, 0, u64::MAX)
            .await
            .expect("read records")
    }
}
