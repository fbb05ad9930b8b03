//! Recorded performance command handlers.

use std::sync::Arc;

use serde_json::Value;
use vaultkeep_types::{FeedId, Vault};

use super::{to_value, vault_param, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Default number of price samples returned by `get_price_history`.
const DEFAULT_HISTORY_LIMIT: u32 = 100;

async fn managed_vault(state: &Arc<DaemonState>, params: &Value) -> std::result::Result<Vault, RpcError> {
    let address = vault_param(params)?;
    state
        .registry
        .get(&address)
        .await
        .ok_or_else(|| RpcError::vault_not_found(address.as_str()))
}

fn optional_u64(params: &Value, key: &str) -> std::result::Result<Option<u64>, RpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be a unix timestamp"))),
    }
}

/// Records of one vault between `start` and `end` (inclusive, both
/// optional), oldest first.
pub async fn get_vault_performance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let vault = managed_vault(state, params).await?;
    let start = optional_u64(params, "start")?.unwrap_or(0);
    let end = optional_u64(params, "end")?.unwrap_or(u64::MAX);
    if start > end {
        return Err(RpcError::invalid_params("start after end"));
    }

    let records = state
        .store
        .get_vault_performance(vault.id, start, end)
        .await
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    to_value(&records)
}

pub async fn get_latest_performance(state: &Arc<DaemonState>, params: &Value) -> Result {
    let vault = managed_vault(state, params).await?;
    let record = state
        .store
        .latest_vault_performance(vault.id)
        .await
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    to_value(&record)
}

/// Stored samples of one feed, newest first.
pub async fn get_price_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let feed = params
        .get("feed")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("feed required"))?;
    let feed = FeedId::parse(feed).map_err(|e| RpcError::invalid_params(&e.to_string()))?;
    let limit = match optional_u64(params, "limit")? {
        Some(limit) => u32::try_from(limit).map_err(|_| RpcError::invalid_params("limit too large"))?,
        None => DEFAULT_HISTORY_LIMIT,
    };

    let samples = state
        .store
        .recent_prices(&feed, limit)
        .await
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    to_value(&samples)
}
