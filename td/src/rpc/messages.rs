//! JSON-RPC 2.0 message shapes and the daemon's error code table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub const AGENT_NOT_FOUND: i64 = -32001;
pub const MAX_LOOPS_EXCEEDED: i64 = -32002;
pub const LOOP_NOT_FOUND: i64 = -32003;
pub const GIT_ERROR: i64 = -32004;
pub const ORIGIN_MISMATCH: i64 = -32005;
pub const BRANCH_NOT_FOUND: i64 = -32006;
pub const DISK_FULL: i64 = -32007;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self { code, message: message.into(), data: Some(data) }
    }
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn error(id: Value, error: RpcErrorObject) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }

    /// Serialize as a single NDJSON line (compact JSON + trailing newline).
    pub fn to_line(&self) -> String {
        let mut s = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"failed to serialize response"}}"#
                .to_string()
        });
        s.push('\n');
        s
    }
}

/// A `LoopEvent` wrapped as a JSON-RPC 2.0 notification (no `id`).
pub fn event_notification(params: Value) -> String {
    let notification = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "event",
        "params": params,
    });
    let mut s = serde_json::to_string(&notification).unwrap_or_default();
    s.push('\n');
    s
}
