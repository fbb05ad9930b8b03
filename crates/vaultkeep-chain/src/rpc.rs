//! Sui JSON-RPC client.
//!
//! | operation | method |
//! |---|---|
//! | balance | `suix_getBalance` |
//! | object read | `sui_getObject` |
//! | build | `unsafe_moveCall` |
//! | submit | `sui_executeTransactionBlock` (`WaitForLocalExecution`) |
//! | confirmation check | `suix_queryTransactionBlocks` |
//!
//! Transport and node errors are classified into [`ChainError`] here so the
//! rest of the daemon never inspects messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use vaultkeep_types::{TxRef, VaultAddress};

use crate::{ChainClient, ChainError, ChainEvent, Execution, LandedQuery, MoveCall, Result};

/// Gas coin type queried for the signer balance.
pub const SUI_COIN_TYPE: &str = "0x2::sui::SUI";

/// Number of recent transactions inspected by the confirmation check.
const LANDED_LOOKBACK: u32 = 20;

/// JSON-RPC request.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Sui JSON-RPC client over HTTP.
#[derive(Debug)]
pub struct SuiRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl SuiRpcClient {
    /// Create a client for `url`. `request_timeout` bounds each HTTP call.
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ChainError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::trace!(method, "sui rpc call");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Network(format!("{method}: HTTP {status}")));
        }

        let body: RpcResponse = response.json().await.map_err(classify_transport)?;
        if let Some(error) = body.error {
            return Err(classify_rpc_error(method, &error));
        }
        body.result
            .ok_or_else(|| ChainError::Network(format!("{method}: empty result")))
    }
}

fn classify_transport(err: reqwest::Error) -> ChainError {
    if err.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::Network(err.to_string())
    }
}

/// Map a node error object onto the closed error set.
///
/// Request-shape errors mean the call itself is wrong and will not succeed on
/// retry; gas-related rejections are reported as missing funds; everything
/// else is treated as a node-side transient.
fn classify_rpc_error(method: &str, error: &RpcError) -> ChainError {
    let detail = format!("{method}: {} ({})", error.message, error.code);
    let lowered = error.message.to_ascii_lowercase();

    if lowered.contains("insufficient") && (lowered.contains("gas") || lowered.contains("balance")) {
        return ChainError::InsufficientFunds(detail);
    }
    match error.code {
        -32602 | -32601 | -32600 => ChainError::ContractRejected(detail),
        _ if lowered.contains("moveabort") || lowered.contains("function not found") => {
            ChainError::ContractRejected(detail)
        }
        _ => ChainError::Network(detail),
    }
}

/// Interpret an executed transaction block (`effects` + `events`).
pub fn parse_execution(block: &Value) -> Result<Execution> {
    let digest = block
        .get("digest")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::Network("response without digest".into()))?;

    let status = block.pointer("/effects/status/status").and_then(Value::as_str);
    match status {
        Some("success") => {}
        Some(_) => {
            let error = block
                .pointer("/effects/status/error")
                .and_then(Value::as_str)
                .unwrap_or("execution failed")
                .to_string();
            return Err(if error.contains("InsufficientGas") {
                ChainError::InsufficientFunds(format!("{digest}: {error}"))
            } else {
                ChainError::ContractRejected(format!("{digest}: {error}"))
            });
        }
        None => return Err(ChainError::Network(format!("{digest}: effects missing"))),
    }

    let timestamp = block
        .get("timestampMs")
        .and_then(json_u64)
        .map(|ms| ms / 1000);

    let events = block
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .map(|event| ChainEvent {
                    event_type: event
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    parsed: event.get("parsedJson").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Execution {
        digest: TxRef(digest.to_string()),
        timestamp,
        events,
    })
}

/// Sui encodes 64-bit integers as strings; accept either form.
pub(crate) fn json_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Whether any string inside `value` names `object`.
fn mentions_object(value: &Value, object: &VaultAddress) -> bool {
    match value {
        Value::String(s) => VaultAddress::parse(s).is_ok_and(|a| &a == object),
        Value::Array(items) => items.iter().any(|v| mentions_object(v, object)),
        Value::Object(map) => map.values().any(|v| mentions_object(v, object)),
        _ => false,
    }
}

/// Pick the newest successful block from a `suix_queryTransactionBlocks`
/// page that matches `query`.
pub fn select_landed(page: &Value, query: &LandedQuery) -> Option<Execution> {
    let sender = VaultAddress::parse(&query.sender).ok();
    let target_is_vault = VaultAddress::parse(&query.package).is_ok_and(|p| p == query.vault);

    page.get("data")
        .and_then(Value::as_array)?
        .iter()
        .filter(|block| {
            let block_sender = block
                .pointer("/transaction/data/sender")
                .and_then(Value::as_str)
                .and_then(|s| VaultAddress::parse(s).ok());
            block_sender.is_some() && block_sender == sender
        })
        .filter(|block| {
            let at = block.get("timestampMs").and_then(json_u64).map(|ms| ms / 1000);
            at.is_some_and(|at| at >= query.since)
        })
        .filter(|block| {
            target_is_vault
                || block
                    .pointer("/transaction/data/transaction/inputs")
                    .is_some_and(|inputs| mentions_object(inputs, &query.vault))
        })
        .find_map(|block| parse_execution(block).ok())
}

impl ChainClient for SuiRpcClient {
    async fn get_balance(&self, owner: &str) -> Result<u64> {
        let result = self
            .call("suix_getBalance", json!([owner, SUI_COIN_TYPE]))
            .await?;
        result
            .get("totalBalance")
            .and_then(json_u64)
            .ok_or_else(|| ChainError::Network("suix_getBalance: totalBalance missing".into()))
    }

    async fn get_object(&self, id: &VaultAddress) -> Result<Value> {
        let result = self
            .call(
                "sui_getObject",
                json!([id.as_str(), {"showContent": true, "showOwner": true}]),
            )
            .await?;
        if let Some(error) = result.get("error") {
            return Err(ChainError::ContractRejected(format!(
                "sui_getObject {}: {error}",
                id.short()
            )));
        }
        result
            .pointer("/data/content")
            .cloned()
            .ok_or_else(|| ChainError::Network(format!("sui_getObject {}: no content", id.short())))
    }

    async fn build_compound(&self, call: &MoveCall) -> Result<Vec<u8>> {
        let result = self
            .call(
                "unsafe_moveCall",
                json!([
                    call.signer,
                    call.package,
                    call.module,
                    call.function,
                    call.type_arguments,
                    call.arguments,
                    Value::Null,
                    call.gas_budget.to_string(),
                ]),
            )
            .await?;
        let tx_bytes = result
            .get("txBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Network("unsafe_moveCall: txBytes missing".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(tx_bytes)
            .map_err(|e| ChainError::Network(format!("unsafe_moveCall: bad txBytes: {e}")))
    }

    async fn execute(&self, tx_bytes: &[u8], signature: &str) -> Result<Execution> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(tx_bytes);
        let result = self
            .call(
                "sui_executeTransactionBlock",
                json!([
                    encoded,
                    [signature],
                    {"showEffects": true, "showEvents": true},
                    "WaitForLocalExecution",
                ]),
            )
            .await?;
        parse_execution(&result)
    }

    async fn find_landed_compound(&self, query: &LandedQuery) -> Result<Option<Execution>> {
        let result = self
            .call(
                "suix_queryTransactionBlocks",
                json!([
                    {
                        "filter": {"MoveFunction": {
                            "package": query.package,
                            "module": query.module,
                            "function": query.function,
                        }},
                        "options": {"showInput": true, "showEffects": true, "showEvents": true},
                    },
                    Value::Null,
                    LANDED_LOOKBACK,
                    true,
                ]),
            )
            .await?;
        Ok(select_landed(&result, query))
    }
}
