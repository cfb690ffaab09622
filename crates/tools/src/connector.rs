//! Turning a configured server into a live session.
//!
//! The registry only sees [`Connector`] and [`ToolSession`]; [`McpConnector`]
//! is the real implementation over the stdio and SSE transports.

use crate::client::{ClientError, McpClient};
use crate::transport::{SseTransport, StdioTransport, Transport};
use async_trait::async_trait;
use redscope_config::{ServerDescriptor, TransportSpec};
use redscope_core::error::ToolProviderError;
use redscope_core::tool::ToolDefinition;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A connected tool provider.
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolProviderError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Value, ToolProviderError>;

    /// Release the provider's resources (terminate process / close session).
    async fn close(&self) -> Result<(), ToolProviderError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the handshake.
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn ToolSession>, ToolProviderError>;
}

/// Connects over stdio or SSE depending on the descriptor.
#[derive(Debug, Clone)]
pub struct McpConnector {
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl McpConnector {
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            request_timeout,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn ToolSession>, ToolProviderError> {
        let name = descriptor.name.clone();
        let (transport, is_process): (Box<dyn Transport>, bool) = match &descriptor.transport {
            TransportSpec::Process { command, args, env } => (
                Box::new(StdioTransport::new(&name, command, args.clone(), env.clone())),
                true,
            ),
            TransportSpec::Remote { url } => (
                Box::new(SseTransport::new(&name, url, self.connect_timeout)),
                false,
            ),
        };

        let client = McpClient::start(&name, transport, self.request_timeout)
            .await
            .map_err(|e| {
                let reason = e.to_string();
                if is_process {
                    ToolProviderError::Spawn {
                        name: name.clone(),
                        reason,
                    }
                } else {
                    ToolProviderError::Unreachable {
                        name: name.clone(),
                        reason,
                    }
                }
            })?;

        let handshake = tokio::time::timeout(self.connect_timeout, client.initialize()).await;
        let failure = match handshake {
            Ok(Ok(info)) => {
                info!(provider = %name, server = %info.name, "Connected to tool provider");
                return Ok(Arc::new(McpSession { client }));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "no response within {}s",
                self.connect_timeout.as_secs()
            ),
        };

        if let Err(e) = client.close().await {
            warn!(provider = %name, error = %e, "Failed to release provider after handshake failure");
        }
        Err(ToolProviderError::Handshake {
            name,
            reason: failure,
        })
    }
}

struct McpSession {
    client: McpClient,
}

impl McpSession {
    fn protocol_error(&self, e: ClientError) -> ToolProviderError {
        ToolProviderError::Protocol {
            name: self.client.name().to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolProviderError> {
        self.client
            .list_tools()
            .await
            .map_err(|e| self.protocol_error(e))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Value, ToolProviderError> {
        self.client
            .call_tool(name, arguments)
            .await
            .map_err(|e| self.protocol_error(e))
    }

    async fn close(&self) -> Result<(), ToolProviderError> {
        self.client
            .close()
            .await
            .map_err(|e| ToolProviderError::Cleanup {
                name: self.client.name().to_string(),
                reason: e.to_string(),
            })
    }
}
