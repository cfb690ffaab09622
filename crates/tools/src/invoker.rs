//! `ToolInvoker` over the connected providers.

use crate::connector::ToolSession;
use async_trait::async_trait;
use redscope_core::error::{ToolError, ToolProviderError};
use redscope_core::tool::{ToolDefinition, ToolInvoker};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// A handle to one connected provider.
#[derive(Clone)]
pub struct ConnectedProvider {
    pub name: String,
    session: Arc<dyn ToolSession>,
    cache_tools_list: bool,
    cache: Arc<Mutex<Option<Vec<ToolDefinition>>>>,
}

impl ConnectedProvider {
    pub fn new(
        name: String,
        session: Arc<dyn ToolSession>,
        cache_tools_list: bool,
        cache: Arc<Mutex<Option<Vec<ToolDefinition>>>>,
    ) -> Self {
        Self {
            name,
            session,
            cache_tools_list,
            cache,
        }
    }

    /// The provider's tools, from cache when caching is enabled.
    pub async fn tools(&self) -> Result<Vec<ToolDefinition>, ToolProviderError> {
        if !self.cache_tools_list {
            return self.session.list_tools().await;
        }

        let mut cache = self.cache.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }
        let tools = self.session.list_tools().await?;
        *cache = Some(tools.clone());
        Ok(tools)
    }
}

/// Routes tool calls to the provider that exposes the tool.
pub struct ConnectedTools {
    providers: Vec<ConnectedProvider>,
    routes: RwLock<HashMap<String, usize>>,
}

impl ConnectedTools {
    pub fn new(providers: Vec<ConnectedProvider>) -> Self {
        Self {
            providers,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Provider names, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Each provider's tools, keeping providers that failed to list with an empty set.
    pub async fn tools_by_provider(&self) -> Vec<(String, Result<Vec<ToolDefinition>, ToolProviderError>)> {
        let mut out = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            out.push((provider.name.clone(), provider.tools().await));
        }
        out
    }

    async fn route(&self, name: &str) -> Option<usize> {
        if let Some(index) = self.routes.read().await.get(name) {
            return Some(*index);
        }
        // Unknown so far: refresh the routing table once.
        self.definitions().await;
        self.routes.read().await.get(name).copied()
    }
}

#[async_trait]
impl ToolInvoker for ConnectedTools {
    async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = Vec::new();
        let mut routes = HashMap::new();

        for (index, provider) in self.providers.iter().enumerate() {
            let tools = match provider.tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(provider = %provider.name, error = %e, "Failed to list tools");
                    continue;
                }
            };

            for tool in tools {
                if let Some(owner) = routes.get(&tool.name) {
                    let owner: &ConnectedProvider = &self.providers[*owner];
                    warn!(
                        tool = %tool.name,
                        kept = %owner.name,
                        ignored = %provider.name,
                        "Tool exposed by two providers"
                    );
                    continue;
                }
                routes.insert(tool.name.clone(), index);
                definitions.push(tool);
            }
        }

        *self.routes.write().await = routes;
        definitions
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let index = self
            .route(name)
            .await
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let provider = &self.providers[index];

        debug!(tool = name, provider = %provider.name, "Invoking tool");
        provider
            .session
            .call_tool(name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: e.to_string(),
            })
    }
}
