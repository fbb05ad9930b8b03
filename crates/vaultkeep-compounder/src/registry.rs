//! Vault Registry.
//!
//! The set of vaults is fixed at startup; each vault sits behind its own
//! `tokio::sync::Mutex`, so calls for one vault serialize while distinct
//! vaults never contend. Every transition is written to the store first and
//! only then applied in memory.
//!
//! ```text
//! idle ──claim──▶ in_progress ──success──▶ idle
//!   ▲                  │ ├────failure──▶ failed ───┐
//!   │                  │ └─unrecorded──▶ degraded ─┤
//!   └──────────────────┴── interval (+ cooldown) ──┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use vaultkeep_db::queries::vaults::VaultUpdate;
use vaultkeep_types::{Timestamp, Vault, VaultAddress, VaultStatus};

use crate::store::{Store, StoreError};

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown vault {0}")]
    UnknownVault(VaultAddress),

    #[error("vault {0} already has a cycle in progress")]
    AlreadyInProgress(VaultAddress),

    #[error("vault {0} has no cycle in progress")]
    NotInProgress(VaultAddress),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// How a cycle ended, as far as the registry is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Compounded and recorded.
    Succeeded { compounded_at: Timestamp },
    /// Compounded on-chain but the record could not be written.
    Unrecorded { compounded_at: Timestamp },
    /// Nothing landed on-chain.
    Failed,
}

/// Configured vaults and their compounding state.
#[derive(Debug)]
pub struct Registry {
    vaults: BTreeMap<VaultAddress, Arc<Mutex<Vault>>>,
    store: Store,
    /// Extra wait after a failed or degraded cycle. `None` uses each vault's
    /// own interval.
    failure_cooldown: Option<u64>,
}

impl Registry {
    /// Load the configured vaults, creating missing rows.
    ///
    /// Stored intervals are realigned with `interval_secs`. A vault left
    /// `in_progress` by a previous run is marked `failed`: whatever that
    /// cycle did, it is no longer running.
    pub async fn load(
        store: Store,
        addresses: &[VaultAddress],
        interval_secs: u64,
        failure_cooldown: Option<u64>,
        now: Timestamp,
    ) -> Result<Self> {
        let mut vaults = BTreeMap::new();

        for address in addresses {
            if vaults.contains_key(address) {
                continue;
            }

            let mut vault = match store.find_vault(address).await? {
                Some(existing) => existing,
                None => {
                    info!(vault = %address.short(), "registering vault");
                    store.create_vault(address, interval_secs, now).await?
                }
            };

            let mut update = VaultUpdate::default();
            if vault.interval_secs != interval_secs {
                update.interval_secs = Some(interval_secs);
            }
            if vault.status == VaultStatus::InProgress {
                warn!(vault = %address.short(), "previous cycle was interrupted");
                update.status = Some(VaultStatus::Failed);
            }
            if update != VaultUpdate::default() {
                vault = store.update_vault(vault.id, &update, now).await?;
            }

            vaults.insert(address.clone(), Arc::new(Mutex::new(vault)));
        }

        info!(count = vaults.len(), "vault registry loaded");
        Ok(Self {
            vaults,
            store,
            failure_cooldown,
        })
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    pub fn contains(&self, address: &VaultAddress) -> bool {
        self.vaults.contains_key(address)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn cooldown_for(&self, vault: &Vault) -> u64 {
        self.failure_cooldown.unwrap_or(vault.interval_secs)
    }

    fn slot(&self, address: &VaultAddress) -> Result<&Arc<Mutex<Vault>>> {
        self.vaults
            .get(address)
            .ok_or_else(|| RegistryError::UnknownVault(address.clone()))
    }

    /// Current state of one vault.
    pub async fn get(&self, address: &VaultAddress) -> Option<Vault> {
        match self.vaults.get(address) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    /// Current state of every vault, ordered by address.
    pub async fn snapshot(&self) -> Vec<Vault> {
        let mut out = Vec::with_capacity(self.vaults.len());
        for slot in self.vaults.values() {
            out.push(slot.lock().await.clone());
        }
        out
    }

    /// Vaults due at `now`. Vaults with a cycle in progress are never due.
    pub async fn due(&self, now: Timestamp) -> Vec<Vault> {
        let mut out = Vec::new();
        for slot in self.vaults.values() {
            let vault = slot.lock().await;
            if vault.is_due(now, self.cooldown_for(&vault)) {
                out.push(vault.clone());
            }
        }
        out
    }

    /// Move a vault to `in_progress`, recording the attempt time.
    pub async fn mark_in_progress(&self, address: &VaultAddress, now: Timestamp) -> Result<Vault> {
        let mut vault = self.slot(address)?.lock().await;
        if vault.status == VaultStatus::InProgress {
            return Err(RegistryError::AlreadyInProgress(address.clone()));
        }
        self.begin(&mut vault, now).await
    }

    /// Claim every due vault: check and transition under the same lock, so
    /// a vault can never be handed out twice.
    ///
    /// A vault whose transition cannot be persisted is skipped this time.
    pub async fn claim_due(&self, now: Timestamp) -> Vec<Vault> {
        let mut claimed = Vec::new();
        for (address, slot) in &self.vaults {
            let mut vault = slot.lock().await;
            if !vault.is_due(now, self.cooldown_for(&vault)) {
                continue;
            }
            match self.begin(&mut vault, now).await {
                Ok(v) => claimed.push(v),
                Err(error) => {
                    warn!(vault = %address.short(), %error, "could not claim due vault");
                }
            }
        }
        claimed
    }

    async fn begin(&self, vault: &mut Vault, now: Timestamp) -> Result<Vault> {
        let update = VaultUpdate {
            status: Some(VaultStatus::InProgress),
            last_attempt_at: Some(now),
            ..Default::default()
        };
        let stored = self.store.update_vault(vault.id, &update, now).await?;
        *vault = stored;
        Ok(vault.clone())
    }

    /// Finish the cycle of a vault.
    ///
    /// `last_compounded_at` only moves when the compound landed. If the
    /// store rejects the write, memory is not advanced: the vault is kept
    /// `degraded` in memory and the error is returned.
    pub async fn mark_completed(
        &self,
        address: &VaultAddress,
        completion: Completion,
        now: Timestamp,
    ) -> Result<Vault> {
        let mut vault = self.slot(address)?.lock().await;
        if vault.status != VaultStatus::InProgress {
            return Err(RegistryError::NotInProgress(address.clone()));
        }

        let update = match completion {
            Completion::Succeeded { compounded_at } => VaultUpdate {
                status: Some(VaultStatus::Idle),
                last_compounded_at: Some(compounded_at),
                ..Default::default()
            },
            Completion::Unrecorded { compounded_at } => VaultUpdate {
                status: Some(VaultStatus::Degraded),
                last_compounded_at: Some(compounded_at),
                ..Default::default()
            },
            Completion::Failed => VaultUpdate {
                status: Some(VaultStatus::Failed),
                ..Default::default()
            },
        };

        match self.store.update_vault(vault.id, &update, now).await {
            Ok(stored) => {
                *vault = stored;
                Ok(vault.clone())
            }
            Err(error) => {
                warn!(
                    vault = %address.short(),
                    %error,
                    "could not persist cycle completion; vault degraded"
                );
                vault.status = VaultStatus::Degraded;
                Err(error.into())
            }
        }
    }
}
