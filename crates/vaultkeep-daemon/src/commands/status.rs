//! Daemon status command handlers.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use vaultkeep_types::now_secs;

use super::{to_value, vault_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Scheduler counters plus static daemon facts.
pub async fn get_health(state: &Arc<DaemonState>) -> Result {
    let snapshot = state.health.snapshot();
    let mut health = to_value(&snapshot)?;
    if let Some(map) = health.as_object_mut() {
        map.insert("version".into(), env!("CARGO_PKG_VERSION").into());
        map.insert("now".into(), now_secs().into());
        map.insert("vaults".into(), state.registry.len().into());
        map.insert(
            "compounding_enabled".into(),
            state.signer_address.is_some().into(),
        );
        map.insert(
            "last_error".into(),
            to_value(&snapshot.last_error())?,
        );
    }
    Ok(health)
}

/// Every managed vault, ordered by address.
pub async fn list_vaults(state: &Arc<DaemonState>) -> Result {
    to_value(&state.registry.snapshot().await)
}

pub async fn get_vault(state: &Arc<DaemonState>, params: &Value) -> Result {
    let address = vault_param(params)?;
    match state.registry.get(&address).await {
        Some(vault) => to_value(&vault),
        None => Err(RpcError::vault_not_found(address.as_str())),
    }
}

/// Ask the daemon to stop.
pub async fn shutdown(state: &Arc<DaemonState>) -> Result {
    info!("shutdown requested over control socket");
    let _ = state.shutdown_tx.send(());
    Ok(serde_json::json!({"stopping": true}))
}
