//! vaultkeep-daemon: the vault compounding daemon.
//!
//! Single OS process running a Tokio async runtime. A scheduler compounds
//! the configured vaults on their interval; operators query state via
//! JSON-RPC over a Unix socket.

mod commands;
mod config;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};
use vaultkeep_chain::{SubmitterConfig, Submitter, SuiRpcClient};
use vaultkeep_compounder::{
    CycleRunner, CycleSettings, Health, Registry, RetryController, Scheduler, SchedulerConfig,
    Store, Valuation,
};
use vaultkeep_oracle::{AnyPriceSource, HermesSource, OracleSettings, PriceOracle, StaticPriceSource};
use vaultkeep_types::{now_secs, FeedId};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub store: Store,
    pub registry: Arc<Registry>,
    pub health: Arc<Health>,
    /// Chain client, also used read-only without a signer.
    pub chain: Arc<SuiRpcClient>,
    pub oracle: Arc<PriceOracle<AnyPriceSource>>,
    /// Configured price feeds.
    pub feeds: Vec<FeedId>,
    /// Sender address; `None` when no signing key is configured.
    pub signer_address: Option<String>,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

fn price_source(config: &DaemonConfig) -> anyhow::Result<AnyPriceSource> {
    Ok(match config.oracle.source.as_str() {
        "static" => AnyPriceSource::Static(StaticPriceSource::with_prices(config.static_prices())),
        _ => AnyPriceSource::Hermes(HermesSource::new(
            &config.oracle_endpoint(),
            Duration::from_secs(config.oracle.request_timeout_secs),
        )?),
    })
}

fn oracle_settings(config: &DaemonConfig) -> OracleSettings {
    OracleSettings {
        request_timeout: Duration::from_secs(config.oracle.request_timeout_secs),
        batch_deadline: Duration::from_secs(config.oracle.batch_deadline_secs),
        max_staleness: config.oracle.max_staleness_secs,
    }
}

fn submitter_config(config: &DaemonConfig) -> SubmitterConfig {
    SubmitterConfig {
        package_id: (!config.chain.package_id.is_empty()).then(|| config.chain.package_id.clone()),
        module: config.chain.module.clone(),
        function: config.chain.function.clone(),
        gas_budget: config.chain.gas_budget,
        attempt_timeout: Duration::from_secs(config.chain.attempt_timeout_secs),
    }
}

fn scheduler_config(config: &DaemonConfig) -> SchedulerConfig {
    SchedulerConfig {
        tick: Duration::from_secs(config.scheduler.tick_secs.max(1)),
        concurrency: config.scheduler.concurrency,
        shutdown_grace: Duration::from_secs(config.scheduler.shutdown_grace_secs),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config file; the log level comes from it
    let mut config = DaemonConfig::load_file()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.logging.level.parse()?),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "vaultkeep daemon starting");

    config.apply_env(|var| std::env::var(var).ok())?;
    config.validate()?;

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let conn = vaultkeep_db::open(&config.db_path())?;
    let store = Store::new(conn, config.backoff());

    // 3. Load vault registry
    let now = now_secs();
    let addresses = config.vault_addresses();
    if addresses.is_empty() {
        warn!("no vaults configured; nothing will be compounded");
    }
    let registry = Arc::new(
        Registry::load(
            store.clone(),
            &addresses,
            config.interval_secs(),
            config.vaults.failure_cooldown_secs,
            now,
        )
        .await?,
    );

    // 4. Chain and oracle clients
    let rpc_url = config.rpc_url()?;
    let chain = Arc::new(SuiRpcClient::new(
        &rpc_url,
        Duration::from_secs(config.chain.request_timeout_secs),
    )?);
    let oracle = Arc::new(PriceOracle::new(price_source(&config)?, oracle_settings(&config)));
    let feeds = config.feed_ids();
    info!(rpc = %rpc_url, feeds = feeds.len(), "clients ready");

    let health = Arc::new(Health::new(now));
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    // 5. Start the scheduler when a signing key is configured
    let signer = config.load_signer(|var| std::env::var(var).ok())?;
    let (signer_address, scheduler) = match signer {
        Some(signer) => {
            let submitter = Arc::new(Submitter::new(
                chain.clone(),
                Arc::new(signer),
                submitter_config(&config),
            ));
            let sender = submitter.sender().to_string();
            info!(%sender, "compounding enabled");

            let runner = Arc::new(CycleRunner::new(
                registry.clone(),
                submitter,
                oracle.clone(),
                RetryController::new(config.backoff()),
                CycleSettings {
                    feeds: feeds.clone(),
                    valuation: Valuation {
                        feed: config.valuation_feed(),
                        decimals: config.oracle.asset_decimals,
                    },
                },
            ));
            let scheduler = Scheduler::new(runner, health.clone(), scheduler_config(&config));
            let handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));
            (Some(sender), Some(handle))
        }
        None => {
            warn!("no signing key configured; compounding disabled, read-only operations available");
            (None, None)
        }
    };

    // 6. Build daemon state
    let state = Arc::new(DaemonState {
        store,
        registry,
        health,
        chain,
        oracle,
        feeds,
        signer_address,
        shutdown_tx: shutdown_tx.clone(),
    });

    // 7. Run the control socket until shutdown
    let socket_path = config.socket_path();
    let rpc_enabled = config.rpc.enabled;
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());
    let control = async {
        if rpc_enabled {
            rpc_server.run().await
        } else {
            std::future::pending().await
        }
    };

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = control => {
            if let Err(e) = result {
                error!(error = %e, "control socket error");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!("daemon shutting down");
    let _ = shutdown_tx.send(());
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler task failed");
        }
    }

    if rpc_enabled {
        let _ = std::fs::remove_file(&socket_path);
    }

    info!("daemon stopped");
    Ok(())
}
