//! ToolInvoker trait: how the agent reaches tools exposed by tool providers.
//!
//! The registry in `redscope-tools` implements this over connected providers;
//! [`NoTools`] is the degraded mode when none connected.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Lists and calls tools on behalf of the model.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Definitions of every tool currently callable.
    async fn definitions(&self) -> Vec<ToolDefinition>;

    /// Call a tool by name. The output is whatever the provider returned,
    /// structured or text.
    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

/// The empty tool set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolInvoker for NoTools {
    async fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn invoke(
        &self,
        name: &str,
        _arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "nmap_scan".into(),
            description: "Scan a host for open ports".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": { "type": "string", "description": "Host to scan" }
                },
                "required": ["target"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("nmap_scan"));
        assert!(json.contains("target"));
    }

    #[tokio::test]
    async fn no_tools_has_nothing_to_call() {
        assert!(NoTools.definitions().await.is_empty());
        let err = NoTools
            .invoke("nmap_scan", serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nmap_scan"));
    }
}
