//! Model Context Protocol client.
//!
//! Wraps a started [`Transport`] and speaks the handful of methods the
//! runtime needs: the `initialize` handshake, `tools/list` and `tools/call`.

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, PROTOCOL_VERSION};
use crate::transport::{Transport, TransportError, TransportHandle};
use redscope_core::tool::ToolDefinition;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request '{method}' timed out after {timeout_secs}s")]
    Timeout { method: String, timeout_secs: u64 },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// What the server told us about itself during the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    server_info: ServerInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<RemoteTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "empty_schema")]
    input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
    handle: TransportHandle,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl McpClient {
    /// Start `transport` and wrap it. The handshake is a separate step.
    pub async fn start(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let handle = transport.start().await?;
        Ok(Self {
            name: name.into(),
            transport,
            handle,
            next_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let response = tokio::time::timeout(self.request_timeout, self.handle.request(&request))
            .await
            .map_err(|_| ClientError::Timeout {
                method: method.to_string(),
                timeout_secs: self.request_timeout.as_secs(),
            })??;

        if let Some(error) = response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| ClientError::UnexpectedResponse(format!("'{method}' returned no result")))
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    pub async fn initialize(&self) -> Result<ServerInfo, ClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self.send_request("initialize", params).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;

        self.handle
            .notify(&JsonRpcNotification::new("notifications/initialized"))
            .await?;

        debug!(
            provider = %self.name,
            server = %init.server_info.name,
            version = %init.server_info.version,
            "Tool provider handshake complete"
        );
        Ok(init.server_info)
    }

    /// List every tool, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.send_request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;

            tools.extend(page.tools.into_iter().map(|t| ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool and return the raw result object (`content`, `isError`).
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Value, ClientError> {
        self.send_request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.transport.close().await?;
        Ok(())
    }
}
