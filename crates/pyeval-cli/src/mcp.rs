//! MCP protocol - JSON-RPC 2.0 messages and the py-eval tool
//!
//! Stateless: every request is answered on its own, there is no session
//! and no server-initiated traffic. Notifications get no response.

use pyeval_core::{EvalInput, EvalResultDto};
use pyeval_sandbox::TimeoutRace;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const JSONRPC_VERSION: &str = "2.0";
pub const TOOL_NAME: &str = "py-eval";

/// Newest first; an unknown client version gets the newest
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

const SERVER_NAME: &str = "py-eval";
const SERVER_TITLE: &str = "Python Evaluator";
const TOOL_DESCRIPTION: &str = include_str!("../doc/description.txt");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications. A present `null` stays `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(json!(id)),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// The py-eval tool as advertised by `tools/list`
pub fn py_eval_tool() -> McpTool {
    McpTool {
        name: TOOL_NAME.to_string(),
        title: Some(SERVER_TITLE.to_string()),
        description: Some(TOOL_DESCRIPTION.trim().to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to evaluate"
                },
                "context": {
                    "type": "object",
                    "description": "JSON values exposed to the code as `context`",
                    "additionalProperties": true
                }
            },
            "required": ["code"]
        }),
        output_schema: Some(json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": ["object", "null"],
                    "additionalProperties": true
                },
                "error": {
                    "type": ["object", "null"],
                    "properties": {
                        "code": { "type": "integer" },
                        "message": { "type": "string" }
                    },
                    "required": ["code", "message"]
                }
            },
            "required": ["result", "error"]
        })),
    }
}

/// Answers MCP requests by running evaluations through the timeout race
pub struct McpService {
    race: TimeoutRace,
    version: String,
}

impl McpService {
    pub fn new(race: TimeoutRace) -> Self {
        Self {
            race,
            version: format!("v{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// How long an evaluation may take before the caller gets a timeout
    pub fn evaluation_timeout(&self) -> Duration {
        self.race.timeout()
    }

    /// Dispatch one request. `None` means the request was a notification.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "notification received");
            return None;
        };

        if id.is_null() {
            return Some(JsonRpcResponse::failure(
                Value::Null,
                INVALID_REQUEST,
                "request id must not be null",
            ));
        }

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("unsupported jsonrpc version: {}", request.jsonrpc),
            ));
        }

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": [py_eval_tool()] })),
            "tools/call" => self.call_tool(request.params).await,
            other => Err((METHOD_NOT_FOUND, format!("method not found: {}", other))),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let protocol_version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]);

        info!(protocol_version, "client initialized");

        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "title": SERVER_TITLE,
                "version": self.version,
            }
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, (i32, String)> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| (INVALID_PARAMS, format!("invalid tools/call params: {}", e)))?;

        if params.name != TOOL_NAME {
            return Err((INVALID_PARAMS, format!("unknown tool: {}", params.name)));
        }

        let input: EvalInput = serde_json::from_value(params.arguments.unwrap_or(Value::Null))
            .map_err(|e| (INVALID_PARAMS, format!("invalid py-eval arguments: {}", e)))?;

        let dto = EvalResultDto::from(self.race.evaluate(input).await);
        let text = serde_json::to_string(&dto)
            .map_err(|e| (INTERNAL_ERROR, format!("failed to encode result: {}", e)))?;

        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": dto,
            "isError": false,
        }))
    }
}
