//! JSON-RPC 2.0 envelopes and hex quantity helpers

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Application-level error carried inside a well-formed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Incoming response envelope.
///
/// `id` is optional because some nodes answer parse errors with `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

/// Ethereum "quantity" encoding: `0x`-prefixed hex without leading zeros
pub mod quantity {
    use serde_json::Value;

    pub fn encode(value: u128) -> Value {
        Value::String(format!("{value:#x}"))
    }

    pub fn parse_u128(raw: &str) -> Option<u128> {
        let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
        if digits.is_empty() {
            return None;
        }
        u128::from_str_radix(digits, 16).ok()
    }

    pub fn parse_u64(raw: &str) -> Option<u64> {
        parse_u128(raw).and_then(|v| u64::try_from(v).ok())
    }
}
