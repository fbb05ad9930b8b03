//! Configuration file management.
//!
//! `config.toml` in the data directory, then environment overrides
//! ([`DaemonConfig::apply_env`]), then [`DaemonConfig::validate`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vaultkeep_crypto::{CryptoError, Ed25519Signer};
use vaultkeep_types::{Backoff, FeedId, VaultAddress, SECS_PER_HOUR};

/// Environment variable selecting the data directory.
pub const DATA_DIR_ENV: &str = "VAULTKEEP_DATA_DIR";

/// Environment variable holding the signing key.
pub const SIGNING_KEY_ENV: &str = "WALLET_PRIVATE_KEY";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {var}: {reason}")]
    Env { var: &'static str, reason: String },

    #[error("invalid endpoint {0:?}: expected an http(s) URL")]
    InvalidEndpoint(String),

    #[error("compounding interval must be positive")]
    ZeroInterval,

    #[error("compounding interval of {0} hours is too large")]
    IntervalTooLarge(u64),

    #[error("scheduler concurrency must be positive")]
    ZeroConcurrency,

    #[error("max attempts must be positive")]
    ZeroAttempts,

    #[error("unknown price source {0:?}")]
    UnknownPriceSource(String),

    #[error("invalid signing key: {0}")]
    SigningKey(#[from] CryptoError),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub vaults: VaultsConfig,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chain access and the compound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// "mainnet" | "testnet" | "devnet" | "localnet".
    #[serde(default = "default_network")]
    pub network: String,
    /// Fullnode JSON-RPC URL. Empty = the network's public fullnode.
    #[serde(default)]
    pub rpc_url: String,
    /// File holding the signing key. Empty = environment only.
    #[serde(default)]
    pub signing_key_path: String,
    /// Package exposing the compound entrypoint. Empty = the vault itself.
    #[serde(default)]
    pub package_id: String,
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default = "default_function")]
    pub function: String,
    /// Gas budget in MIST.
    #[serde(default = "default_gas_budget")]
    pub gas_budget: u64,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Price feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// "hermes" | "static".
    #[serde(default = "default_price_source")]
    pub source: String,
    /// Hermes endpoint. Empty = derived from `network`.
    #[serde(default)]
    pub endpoint: String,
    /// "mainnet" | "testnet".
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub feed_ids: Vec<String>,
    /// Feed used to value TVL. Empty = no quote valuation.
    #[serde(default)]
    pub valuation_feed: String,
    /// Decimals of the vault asset.
    #[serde(default = "default_asset_decimals")]
    pub asset_decimals: u32,
    /// Fixed prices for the static source.
    #[serde(default)]
    pub static_prices: BTreeMap<String, f64>,
    #[serde(default = "default_oracle_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_batch_deadline")]
    pub batch_deadline_secs: u64,
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,
}

/// Managed vaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultsConfig {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Wait after a failed or degraded cycle. Unset = the interval.
    #[serde(default)]
    pub failure_cooldown_secs: Option<u64>,
}

/// Scheduler and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Persistent store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

/// Operator socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Socket path. Empty = $data_dir/daemon.sock.
    #[serde(default)]
    pub socket_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_module() -> String {
    "vault".to_string()
}

fn default_function() -> String {
    "compound".to_string()
}

fn default_gas_budget() -> u64 {
    vaultkeep_chain::submitter::DEFAULT_GAS_BUDGET
}

fn default_attempt_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

fn default_price_source() -> String {
    "hermes".to_string()
}

fn default_asset_decimals() -> u32 {
    9
}

fn default_oracle_timeout() -> u64 {
    5
}

fn default_batch_deadline() -> u64 {
    10
}

fn default_max_staleness() -> u64 {
    vaultkeep_oracle::staleness::STALENESS_THRESHOLD
}

fn default_interval_hours() -> u64 {
    4
}

fn default_tick() -> u64 {
    60
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_db_file() -> String {
    "vaultkeep.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "vaultkeep=info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            rpc_url: String::new(),
            signing_key_path: String::new(),
            package_id: String::new(),
            module: default_module(),
            function: default_function(),
            gas_budget: default_gas_budget(),
            attempt_timeout_secs: default_attempt_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            source: default_price_source(),
            endpoint: String::new(),
            network: default_network(),
            feed_ids: Vec::new(),
            valuation_feed: String::new(),
            asset_decimals: default_asset_decimals(),
            static_prices: BTreeMap::new(),
            request_timeout_secs: default_oracle_timeout(),
            batch_deadline_secs: default_batch_deadline(),
            max_staleness_secs: default_max_staleness(),
        }
    }
}

impl Default for VaultsConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            interval_hours: default_interval_hours(),
            failure_cooldown_secs: None,
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            db_file: default_db_file(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Public fullnode of a Sui network.
pub fn sui_fullnode(network: &str) -> Option<&'static str> {
    match network {
        "mainnet" => Some("https://fullnode.mainnet.sui.io:443"),
        "testnet" => Some("https://fullnode.testnet.sui.io:443"),
        "devnet" => Some("https://fullnode.devnet.sui.io:443"),
        "localnet" => Some("http://127.0.0.1:9000"),
        _ => None,
    }
}

/// Public Hermes endpoint of a Pyth network.
pub fn hermes_endpoint(network: &str) -> &'static str {
    match network {
        "mainnet" => vaultkeep_oracle::hermes::DEFAULT_ENDPOINT,
        _ => "https://hermes-beta.pyth.network",
    }
}

impl DaemonConfig {
    /// Load `config.toml` from the data directory, falling back to defaults
    /// if it does not exist. Environment overrides are applied separately.
    pub fn load_file() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply deployment environment variables on top of the file.
    ///
    /// List variables are JSON arrays. A malformed `VAULT_ADDRESSES` leaves
    /// no vaults configured instead of failing startup.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(network) = lookup("SUI_NETWORK") {
            self.chain.network = network;
        }
        if let Some(url) = lookup("SUI_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Some(hours) = lookup("COMPOUND_INTERVAL_HOURS") {
            self.vaults.interval_hours =
                hours.trim().parse().map_err(|e| ConfigError::Env {
                    var: "COMPOUND_INTERVAL_HOURS",
                    reason: format!("{e}"),
                })?;
        }
        if let Some(raw) = lookup("VAULT_ADDRESSES") {
            self.vaults.addresses = match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(addresses) => addresses,
                Err(error) => {
                    warn!(%error, "VAULT_ADDRESSES is not a JSON array; no vaults configured");
                    Vec::new()
                }
            };
        }
        if let Some(raw) = lookup("PYTH_PRICE_FEED_IDS") {
            self.oracle.feed_ids =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Env {
                    var: "PYTH_PRICE_FEED_IDS",
                    reason: e.to_string(),
                })?;
        }
        if let Some(network) = lookup("PYTH_NETWORK") {
            self.oracle.network = network;
        }
        if let Some(endpoint) = lookup("PYTH_ENDPOINT") {
            self.oracle.endpoint = endpoint;
        }
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.store.data_dir = dir;
        }
        Ok(())
    }

    /// Check everything the scheduler relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_endpoint(&self.rpc_url()?)?;
        if self.oracle.source == "hermes" {
            check_endpoint(&self.oracle_endpoint())?;
        } else if self.oracle.source != "static" {
            return Err(ConfigError::UnknownPriceSource(self.oracle.source.clone()));
        }
        if self.vaults.interval_hours == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        match self.vaults.interval_hours.checked_mul(SECS_PER_HOUR) {
            Some(secs) if i64::try_from(secs).is_ok() => {}
            _ => return Err(ConfigError::IntervalTooLarge(self.vaults.interval_hours)),
        }
        if self.scheduler.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.scheduler.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }

    /// Fullnode URL: explicit, or the configured network's public node.
    pub fn rpc_url(&self) -> Result<String, ConfigError> {
        if !self.chain.rpc_url.is_empty() {
            return Ok(self.chain.rpc_url.clone());
        }
        sui_fullnode(&self.chain.network)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::InvalidEndpoint(self.chain.network.clone()))
    }

    pub fn oracle_endpoint(&self) -> String {
        if self.oracle.endpoint.is_empty() {
            hermes_endpoint(&self.oracle.network).to_string()
        } else {
            self.oracle.endpoint.clone()
        }
    }

    /// Compounding interval in seconds. Saturates; `validate` rejects
    /// intervals that do not fit.
    pub fn interval_secs(&self) -> u64 {
        self.vaults.interval_hours.saturating_mul(SECS_PER_HOUR)
    }

    /// Configured vaults; malformed entries are dropped with a warning.
    pub fn vault_addresses(&self) -> Vec<VaultAddress> {
        self.vaults
            .addresses
            .iter()
            .filter_map(|raw| match VaultAddress::parse(raw) {
                Ok(address) => Some(address),
                Err(error) => {
                    warn!(%error, "ignoring vault address");
                    None
                }
            })
            .collect()
    }

    /// Configured feeds; malformed entries are dropped with a warning.
    pub fn feed_ids(&self) -> Vec<FeedId> {
        parse_feeds(&self.oracle.feed_ids)
    }

    pub fn valuation_feed(&self) -> Option<FeedId> {
        if self.oracle.valuation_feed.is_empty() {
            return None;
        }
        match FeedId::parse(&self.oracle.valuation_feed) {
            Ok(feed) => Some(feed),
            Err(error) => {
                warn!(%error, "ignoring valuation feed");
                None
            }
        }
    }

    pub fn static_prices(&self) -> Vec<(FeedId, f64)> {
        self.oracle
            .static_prices
            .iter()
            .filter_map(|(raw, price)| FeedId::parse(raw).ok().map(|feed| (feed, *price)))
            .collect()
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.scheduler.max_attempts,
            Duration::from_millis(self.scheduler.base_delay_ms),
            Duration::from_millis(self.scheduler.max_delay_ms),
        )
    }

    /// Load the signing key, from the environment first, then from
    /// `chain.signing_key_path`. `None` when neither is set.
    pub fn load_signer(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Ed25519Signer>, ConfigError> {
        let encoded = match lookup(SIGNING_KEY_ENV) {
            Some(key) if !key.trim().is_empty() => key,
            _ if !self.chain.signing_key_path.is_empty() => {
                let path = PathBuf::from(&self.chain.signing_key_path);
                std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?
            }
            _ => return Ok(None),
        };
        Ok(Some(Ed25519Signer::from_encoded(&encoded)?))
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.store.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.store.data_dir)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.store.db_file)
    }

    pub fn socket_path(&self) -> PathBuf {
        if self.rpc.socket_path.is_empty() {
            self.data_dir().join("daemon.sock")
        } else {
            PathBuf::from(&self.rpc.socket_path)
        }
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".vaultkeep"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/vaultkeep"))
    }
}

fn parse_feeds(raw: &[String]) -> Vec<FeedId> {
    raw.iter()
        .filter_map(|id| match FeedId::parse(id) {
            Ok(feed) => Some(feed),
            Err(error) => {
                warn!(%error, "ignoring price feed");
                None
            }
        })
        .collect()
}

/// An endpoint must parse as an absolute http(s) URL with a host.
fn check_endpoint(url: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidEndpoint(url.to_string());
    let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}
