//! In-process test double for the chain.
//!
//! Only built for tests and with the `testing` feature; the daemon never
//! selects it.
//!
//! [`ScriptedChain`] answers every [`ChainClient`] call from memory. Each
//! vault has a queue of [`Step`]s consumed by `execute`; an empty queue means
//! success. Successful executions "land": they get a digest, a timestamp
//! from the settable clock, a `Compounded` event and a TVL bump on the vault
//! object, and they are visible to the confirmation check.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use vaultkeep_types::{Timestamp, TxRef, VaultAddress};

use crate::{ChainClient, ChainError, ChainEvent, Execution, LandedQuery, MoveCall, Result};

/// What the next `execute` for a vault does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Land and report success.
    Succeed,
    /// Fail without landing.
    Fail(ChainError),
    /// Land, then lose the response and report the error.
    LandThenFail(ChainError),
    /// Never answer.
    Hang,
}

#[derive(Debug, Default)]
struct VaultState {
    steps: VecDeque<Step>,
    /// Compounds that landed, oldest first.
    landed: Vec<(String, Execution)>,
    tvl: u64,
    earned_per_compound: u64,
    executed: usize,
    active: usize,
    max_active: usize,
}

/// A deterministic in-memory [`ChainClient`].
#[derive(Debug)]
pub struct ScriptedChain {
    vaults: Mutex<HashMap<VaultAddress, VaultState>>,
    balance: AtomicU64,
    clock: AtomicU64,
    digests: AtomicU64,
    landing_checks: AtomicUsize,
    execute_delay: Mutex<Duration>,
}

impl Default for ScriptedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self {
            vaults: Mutex::new(HashMap::new()),
            balance: AtomicU64::new(1_000_000_000_000),
            clock: AtomicU64::new(0),
            digests: AtomicU64::new(0),
            landing_checks: AtomicUsize::new(0),
            execute_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_balance(&self, balance: u64) {
        self.balance.store(balance, Ordering::SeqCst);
    }

    /// Timestamp given to transactions that land from now on.
    pub fn set_clock(&self, now: Timestamp) {
        self.clock.store(now, Ordering::SeqCst);
    }

    /// Delay every `execute` by `delay` before it takes effect.
    pub fn set_execute_delay(&self, delay: Duration) {
        if let Ok(mut guard) = self.execute_delay.lock() {
            *guard = delay;
        }
    }

    /// Seed a vault object with a TVL and the yield each compound adds.
    pub fn set_vault(&self, vault: &VaultAddress, tvl: u64, earned_per_compound: u64) {
        self.with_vault(vault, |state| {
            state.tvl = tvl;
            state.earned_per_compound = earned_per_compound;
        });
    }

    /// Queue the behaviour of the next `execute` for `vault`.
    pub fn push(&self, vault: &VaultAddress, step: Step) {
        self.with_vault(vault, |state| state.steps.push_back(step));
    }

    /// Number of `execute` calls for `vault`.
    pub fn executed(&self, vault: &VaultAddress) -> usize {
        self.with_vault(vault, |state| state.executed)
    }

    /// Digests of the compounds that landed for `vault`, oldest first.
    pub fn landed(&self, vault: &VaultAddress) -> Vec<TxRef> {
        self.with_vault(vault, |state| {
            state.landed.iter().map(|(_, e)| e.digest.clone()).collect()
        })
    }

    /// Highest number of overlapping `execute` calls seen for `vault`.
    pub fn max_concurrent(&self, vault: &VaultAddress) -> usize {
        self.with_vault(vault, |state| state.max_active)
    }

    /// Number of confirmation checks performed.
    pub fn landing_checks(&self) -> usize {
        self.landing_checks.load(Ordering::SeqCst)
    }

    fn with_vault<T>(&self, vault: &VaultAddress, f: impl FnOnce(&mut VaultState) -> T) -> T {
        let mut guard = self
            .vaults
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(guard.entry(vault.clone()).or_default())
    }

    fn land(&self, vault: &VaultAddress, sender: &str, package: &str) -> Execution {
        let n = self.digests.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.load(Ordering::SeqCst);
        self.with_vault(vault, |state| {
            state.tvl += state.earned_per_compound;
            let execution = Execution {
                digest: TxRef(format!("TX{now}-{n:04}")),
                timestamp: Some(now),
                events: vec![ChainEvent {
                    event_type: format!("{package}::vault::Compounded"),
                    parsed: json!({
                        "vault": vault.as_str(),
                        "earned": state.earned_per_compound.to_string(),
                        "total_assets": state.tvl.to_string(),
                    }),
                }],
            };
            state.landed.push((sender.to_string(), execution.clone()));
            execution
        })
    }
}

/// Ends an `execute` in the overlap count, also when the call is cancelled.
struct ActiveGuard<'a> {
    chain: &'a ScriptedChain,
    vault: &'a VaultAddress,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.chain
            .with_vault(self.vault, |state| state.active = state.active.saturating_sub(1));
    }
}

/// Recover the target vault from the encoded call.
fn decode_call(tx_bytes: &[u8]) -> Result<(MoveCall, VaultAddress)> {
    let call: MoveCall = serde_json::from_slice(tx_bytes)
        .map_err(|e| ChainError::ContractRejected(format!("undecodable transaction: {e}")))?;
    let target = call
        .arguments
        .first()
        .and_then(Value::as_str)
        .unwrap_or(call.package.as_str());
    let vault = VaultAddress::parse(target)
        .map_err(|e| ChainError::ContractRejected(e.to_string()))?;
    Ok((call, vault))
}

impl ChainClient for ScriptedChain {
    async fn get_balance(&self, _owner: &str) -> Result<u64> {
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn get_object(&self, id: &VaultAddress) -> Result<Value> {
        let tvl = self.with_vault(id, |state| state.tvl);
        Ok(json!({
            "dataType": "moveObject",
            "type": format!("{id}::vault::Vault"),
            "fields": {"id": {"id": id.as_str()}, "balance": tvl.to_string()},
        }))
    }

    async fn build_compound(&self, call: &MoveCall) -> Result<Vec<u8>> {
        serde_json::to_vec(call).map_err(|e| ChainError::Network(e.to_string()))
    }

    async fn execute(&self, tx_bytes: &[u8], _signature: &str) -> Result<Execution> {
        let (call, vault) = decode_call(tx_bytes)?;
        let step = self.with_vault(&vault, |state| {
            state.executed += 1;
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
            state.steps.pop_front().unwrap_or(Step::Succeed)
        });
        let _active = ActiveGuard {
            chain: self,
            vault: &vault,
        };

        let delay = self
            .execute_delay
            .lock()
            .map(|d| *d)
            .unwrap_or(Duration::ZERO);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match step {
            Step::Succeed => Ok(self.land(&vault, &call.signer, &call.package)),
            Step::Fail(err) => Err(err),
            Step::LandThenFail(err) => {
                self.land(&vault, &call.signer, &call.package);
                Err(err)
            }
            Step::Hang => {
                std::future::pending::<()>().await;
                Err(ChainError::Timeout)
            }
        }
    }

    async fn find_landed_compound(&self, query: &LandedQuery) -> Result<Option<Execution>> {
        self.landing_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.with_vault(&query.vault, |state| {
            state
                .landed
                .iter()
                .rev()
                .find(|(sender, execution)| {
                    sender == &query.sender
                        && execution.timestamp.is_some_and(|at| at >= query.since)
                })
                .map(|(_, execution)| execution.clone())
        }))
    }
}
