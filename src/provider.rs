//! Balance-query transport.
//!
//! The core depends only on [`BalanceProvider`]; [`JsonRpcBalanceProvider`]
//! is the shipped implementation, a raw JSON-RPC client calling the token's
//! `balanceOf` entry point, optionally routed through a multicall contract
//! so UI surfaces can batch reads.

use crate::{
    config::ProviderConfig,
    constants::{BALANCE_ENTRY_POINT, MULTICALL_AGGREGATE_ENTRY_POINT},
    error::{BalanceError, Result, RpcFailure},
};
use async_trait::async_trait;
use serde::Deserialize;
use starknet_core::utils::get_selector_from_name;
use url::Url;

#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Balance of `account` for the token at `token_address`, as the raw
    /// numeric string the chain reports. No parsing or rounding happens
    /// here; formatting is a presentation concern.
    async fn get_balance(&self, token_address: &str, account_address: &str) -> Result<String>;
}

fn rpc_request(method: &str, params: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    })
}

fn call_params(contract_address: &str, entry_point_selector: &str, calldata: Vec<String>) -> serde_json::Value {
    serde_json::json!([
        {
            "contract_address": contract_address,
            "entry_point_selector": entry_point_selector,
            "calldata": calldata
        },
        "latest"
    ])
}

fn selector_for(function: &str) -> Result<String> {
    let selector = get_selector_from_name(function)
        .map_err(|e| BalanceError::Internal(format!("Selector error: {}", e)))?;
    Ok(format!("{selector:#x}"))
}

/// Calldata for one `balanceOf(account)` wrapped in a multicall
/// `aggregate(calls)`: calls_len, then (to, selector, calldata_len, calldata).
fn aggregate_calldata(token_address: &str, balance_selector: &str, account_address: &str) -> Vec<String> {
    vec![
        "0x1".to_string(),
        token_address.to_string(),
        balance_selector.to_string(),
        "0x1".to_string(),
        account_address.to_string(),
    ]
}

fn parse_felt_u128(value: &str) -> Result<u128> {
    let trimmed = value.trim();
    if let Some(stripped) = trimmed.strip_prefix("0x") {
        u128::from_str_radix(stripped, 16)
            .map_err(|e| BalanceError::InvalidResponse(format!("Invalid felt hex: {}", e)))
    } else {
        trimmed
            .parse::<u128>()
            .map_err(|e| BalanceError::InvalidResponse(format!("Invalid felt dec: {}", e)))
    }
}

/// Decode a Uint256 balance from `(low, high)` felts into a decimal string.
fn decode_u256_balance(low: &str, high: &str) -> Result<String> {
    let low = parse_felt_u128(low)?;
    let high = parse_felt_u128(high)?;
    if high != 0 {
        return Err(BalanceError::InvalidResponse(
            "u256 balance exceeds u128".to_string(),
        ));
    }
    Ok(low.to_string())
}

/// Decode the direct `balanceOf` retdata: exactly the two Uint256 felts.
fn decode_direct_result(values: &[String]) -> Result<String> {
    if values.len() < 2 {
        return Err(BalanceError::InvalidResponse(format!(
            "Expected 2 retdata felts, got {}",
            values.len()
        )));
    }
    decode_u256_balance(&values[0], &values[1])
}

/// Decode `aggregate` retdata: block number, retdata length, then the
/// inner call's felts.
fn decode_aggregate_result(values: &[String]) -> Result<String> {
    if values.len() < 4 {
        return Err(BalanceError::InvalidResponse(format!(
            "Expected 4 aggregate retdata felts, got {}",
            values.len()
        )));
    }
    let declared = parse_felt_u128(&values[1])?;
    if declared != 2 {
        return Err(BalanceError::InvalidResponse(format!(
            "Expected 2 inner retdata felts, aggregate declared {}",
            declared
        )));
    }
    decode_u256_balance(&values[2], &values[3])
}

#[derive(Debug, Deserialize)]
struct RpcReply<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: Option<serde_json::Value>,
    message: Option<String>,
}

impl From<RpcErrorObject> for RpcFailure {
    fn from(error: RpcErrorObject) -> Self {
        RpcFailure {
            code: error.code,
            message: error.message,
        }
    }
}

/// JSON-RPC balance provider against a Starknet node or gateway.
pub struct JsonRpcBalanceProvider {
    rpc_url: String,
    multicall_address: Option<String>,
    client: reqwest::Client,
}

impl JsonRpcBalanceProvider {
    pub fn new(rpc_url: String, multicall_address: Option<String>) -> Result<Self> {
        Url::parse(&rpc_url)
            .map_err(|e| BalanceError::InvalidRequest(format!("Invalid RPC URL: {}", e)))?;
        Ok(Self {
            rpc_url,
            multicall_address,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(config.rpc_url.clone(), config.multicall_address.clone())
    }

    async fn call(&self, params: serde_json::Value) -> Result<Vec<String>> {
        let request = rpc_request("starknet_call", params);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BalanceError::Transport(e.to_string()))?;

        let reply: RpcReply<Vec<String>> = response
            .json()
            .await
            .map_err(|e| BalanceError::Transport(e.to_string()))?;

        if let Some(error) = reply.error {
            return Err(BalanceError::Rpc(error.into()));
        }
        reply
            .result
            .ok_or_else(|| BalanceError::InvalidResponse("Reply has neither result nor error".to_string()))
    }
}

#[async_trait]
impl BalanceProvider for JsonRpcBalanceProvider {
    async fn get_balance(&self, token_address: &str, account_address: &str) -> Result<String> {
        let balance_selector = selector_for(BALANCE_ENTRY_POINT)?;

        match &self.multicall_address {
            Some(multicall) => {
                let selector = selector_for(MULTICALL_AGGREGATE_ENTRY_POINT)?;
                let calldata = aggregate_calldata(token_address, &balance_selector, account_address);
                let values = self.call(call_params(multicall, &selector, calldata)).await?;
                decode_aggregate_result(&values)
            }
            None => {
                let calldata = vec![account_address.to_string()];
                let values = self
                    .call(call_params(token_address, &balance_selector, calldata))
                    .await?;
                decode_direct_result(&values)
            }
        }
    }
}
