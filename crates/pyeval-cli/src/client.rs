//! MCP client for a running py-eval server
//!
//! Speaks plain JSON-RPC over HTTP POST and decodes the tool result back
//! into an `EvalResult`.

use crate::mcp::{JsonRpcRequest, JsonRpcResponse, TOOL_NAME};
use anyhow::{anyhow, bail, Context, Result};
use pyeval_core::{EvalInput, EvalResult, EvalResultDto};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub struct McpHttpClient {
    http: reqwest::Client,
    url: String,
}

impl McpHttpClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        debug!(url = %self.url, method, id, "sending JSON-RPC request");

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach MCP server at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("MCP server answered HTTP {}", status);
        }

        let response: JsonRpcResponse = response
            .json()
            .await
            .context("invalid JSON-RPC response")?;

        if let Some(error) = response.error {
            bail!("MCP error {}: {}", error.code, error.message);
        }

        response.result.ok_or_else(|| anyhow!("no result in response"))
    }

    /// Run one evaluation remotely.
    ///
    /// Transport and protocol failures are the outer error; the evaluation's
    /// own outcome, success or failure, is the inner result.
    pub async fn call_py_eval(&self, input: &EvalInput) -> Result<EvalResult> {
        let params = json!({
            "name": TOOL_NAME,
            "arguments": input,
        });
        let result = self.send_request("tools/call", Some(params)).await?;

        let payload = match result.get("structuredContent") {
            Some(structured) => serde_json::to_vec(structured)?,
            None => text_content(&result)
                .ok_or_else(|| anyhow!("tool result carried no content"))?
                .into_bytes(),
        };

        let dto = EvalResultDto::from_json(&payload).context("malformed py-eval result")?;
        Ok(dto.into_result())
    }
}

/// Text parts of a tool result, joined
fn text_content(result: &Value) -> Option<String> {
    let content = result.get("content")?.as_array()?;
    let text: Vec<&str> = content
        .iter()
        .filter_map(|c| {
            if c.get("type")?.as_str()? == "text" {
                c.get("text")?.as_str()
            } else {
                None
            }
        })
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}
