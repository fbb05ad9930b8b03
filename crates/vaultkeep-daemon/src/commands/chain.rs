//! Live chain and oracle reads.
//!
//! These work without a signing key, except the signer balance.

use std::sync::Arc;

use serde_json::{json, Value};
use vaultkeep_chain::{ChainClient, ChainError};
use vaultkeep_types::now_secs;

use super::{to_value, vault_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

fn chain_error(error: ChainError) -> RpcError {
    RpcError::chain_error(error.kind().as_str(), &error.to_string())
}

/// Gas-coin balance of the configured signer, in MIST.
pub async fn get_signer_balance(state: &Arc<DaemonState>) -> Result {
    let sender = state
        .signer_address
        .as_deref()
        .ok_or_else(RpcError::signer_not_configured)?;
    let balance = state.chain.get_balance(sender).await.map_err(chain_error)?;
    Ok(json!({"address": sender, "balance": balance}))
}

/// Current on-chain content of a managed vault.
pub async fn get_vault_object(state: &Arc<DaemonState>, params: &Value) -> Result {
    let address = vault_param(params)?;
    if !state.registry.contains(&address) {
        return Err(RpcError::vault_not_found(address.as_str()));
    }
    state.chain.get_object(&address).await.map_err(chain_error)
}

/// Fresh samples for every configured feed; failed feeds map to `null`.
pub async fn get_prices(state: &Arc<DaemonState>) -> Result {
    let batch = state.oracle.get_prices(&state.feeds, now_secs()).await;
    let failures: Vec<Value> = batch
        .failures
        .iter()
        .map(|f| json!({"feed": f.feed, "error": f.error.to_string()}))
        .collect();
    Ok(json!({
        "samples": to_value(&batch.samples)?,
        "failures": failures,
    }))
}
