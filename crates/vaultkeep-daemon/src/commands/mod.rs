//! Operator command handlers.
//!
//! Each submodule implements the commands for one category.

pub mod chain;
pub mod performance;
pub mod status;

use serde_json::Value;
use vaultkeep_types::VaultAddress;

use crate::rpc::RpcError;

type Result = std::result::Result<Value, RpcError>;

/// The required `address` parameter.
fn vault_param(params: &Value) -> std::result::Result<VaultAddress, RpcError> {
    let raw = params
        .get("address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("address required"))?;
    VaultAddress::parse(raw).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&format!("encode: {e}")))
}
