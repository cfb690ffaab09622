//! Process-wide wiring: model provider, tool providers, agent and workflows.
//!
//! Startup is two phases. [`Runtime::prepare`] builds everything that cannot
//! block; [`Runtime::serve`] then connects the tool providers and runs the
//! session, both under the same interrupt so Ctrl-C always reaches the
//! orderly cleanup path.

use crate::commands::{self, Session};
use crate::console::ConsoleSink;
use anyhow::Context;
use redscope_agent::{AgentContext, AgentRunner};
use redscope_config::{AppConfig, ServerDescriptor, load_servers};
use redscope_core::provider::ModelProvider;
use redscope_tools::{
    CleanupReport, Connector, McpConnector, ProviderState, ToolProviderRegistry,
};
use redscope_workflow::{AgentMode, WorkflowCatalog, WorkflowEngine};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StartOptions {
    /// Overrides `servers_path` from config.
    pub servers_path: Option<PathBuf>,
    pub connect_tools: bool,
}

/// How [`Runtime::serve`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Completed,
    Interrupted,
}

pub struct Runtime {
    pub config: AppConfig,
    pub registry: ToolProviderRegistry,
    pub agent: AgentRunner,
    pub catalog: WorkflowCatalog,
    pub engine: WorkflowEngine,
    pub agent_mode: AgentMode,
}

/// Read the tool-server document. A document that cannot be read or parsed
/// is reported and the session continues without tools.
pub fn servers_or_none(path: &Path) -> Vec<ServerDescriptor> {
    match load_servers(path) {
        Ok(servers) => servers,
        Err(e) => {
            warn!(error = %e, "Continuing without tool providers");
            eprintln!("  [!] {e}");
            eprintln!("  [!] Continuing without tools.");
            Vec::new()
        }
    }
}

impl Runtime {
    /// Build the model provider, register the configured tool providers and
    /// assemble the agent. Nothing is connected yet.
    pub fn prepare(config: AppConfig, options: &StartOptions) -> anyhow::Result<Self> {
        let timing = &config.runtime.timing;
        let connector = Arc::new(McpConnector::new(
            timing.session_timeout(),
            timing.connect_timeout(),
        ));

        let servers = if options.connect_tools {
            let path = options
                .servers_path
                .clone()
                .unwrap_or_else(|| config.runtime.servers_path.clone());
            servers_or_none(&path)
        } else {
            Vec::new()
        };

        let provider = redscope_providers::build_from_config(&config)
            .context("Failed to build model provider")?;
        Self::assemble(config, Arc::new(provider), connector, servers)
    }

    /// Wire a runtime from explicit parts.
    pub fn assemble(
        config: AppConfig,
        provider: Arc<dyn ModelProvider>,
        connector: Arc<dyn Connector>,
        servers: Vec<ServerDescriptor>,
    ) -> anyhow::Result<Self> {
        let timing = config.runtime.timing.clone();

        let mut registry = ToolProviderRegistry::new(connector, timing.cleanup_timeout());
        registry.register(servers);

        let catalog = WorkflowCatalog::builtin().with_custom(config.runtime.workflows.clone())?;
        let engine = WorkflowEngine::new(timing.step_delay());
        let agent_mode = AgentMode::from_config(&config.runtime.agent_mode);

        let ctx = AgentContext::new(provider, config.model.clone(), config.runtime.clone());
        let agent = AgentRunner::new(ctx, Box::new(ConsoleSink::new()));

        Ok(Self {
            config,
            registry,
            agent,
            catalog,
            engine,
            agent_mode,
        })
    }

    /// Connect every registered tool provider and hand the connected set to
    /// the agent. Providers that fail to connect are skipped.
    pub async fn connect_tools(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        self.registry.connect_all().await;

        let tool_names = self.registry.connected_names();
        info!(
            configured = self.registry.len(),
            connected = tool_names.len(),
            "Tool providers ready"
        );

        let ctx = self
            .agent
            .context()
            .clone()
            .with_tools(Arc::new(self.registry.tools()), tool_names);
        self.agent = AgentRunner::new(ctx, Box::new(ConsoleSink::new()));
    }

    /// Connect the tool providers, then run `session`. Either phase ends
    /// early when `interrupt` resolves. Cleanup is left to [`shutdown`](Self::shutdown).
    pub async fn serve<F>(&mut self, session: Session, interrupt: F) -> anyhow::Result<Finish>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        tokio::select! {
            _ = self.connect_tools() => {}
            _ = &mut interrupt => return Ok(Finish::Interrupted),
        }

        tokio::select! {
            result = commands::dispatch(self, session) => result.map(|()| Finish::Completed),
            _ = &mut interrupt => Ok(Finish::Interrupted),
        }
    }

    /// Names of the connected tool providers.
    pub fn tool_names(&self) -> &[String] {
        &self.agent.context().tool_providers
    }

    /// One line per configured provider with its state.
    pub fn provider_lines(&self) -> Vec<String> {
        self.registry
            .providers()
            .iter()
            .map(|p| match (p.state(), p.last_error()) {
                (ProviderState::Failed, Some(error)) => format!("{}: failed ({error})", p.name()),
                (state, _) => format!("{}: {state}", p.name()),
            })
            .collect()
    }

    pub async fn shutdown(&mut self) -> CleanupReport {
        self.registry.cleanup_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use redscope_config::{RuntimeConfig, TransportSpec};
    use redscope_core::error::{ProviderError, ToolProviderError};
    use redscope_core::provider::{ChunkReceiver, ProviderRequest};
    use redscope_core::tool::ToolDefinition;
    use serde_json::{Map, Value, json};
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SilentModel;

    #[async_trait]
    impl ModelProvider for SilentModel {
        fn name(&self) -> &str {
            "silent"
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            Err(ProviderError::Network("offline".into()))
        }

        async fn health_check(&self) -> Result<bool, ProviderError> {
            Ok(false)
        }
    }

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl redscope_tools::ToolSession for CountingSession {
        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolProviderError> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Map<String, Value>,
        ) -> Result<Value, ToolProviderError> {
            Ok(json!({}))
        }

        async fn close(&self) -> Result<(), ToolProviderError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Connects instantly, except for names in `stalled`, which never answer.
    struct SlowConnector {
        stalled: HashSet<String>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(
            &self,
            descriptor: &ServerDescriptor,
        ) -> Result<Arc<dyn redscope_tools::ToolSession>, ToolProviderError> {
            if self.stalled.contains(&descriptor.name) {
                std::future::pending::<()>().await;
            }
            Ok(Arc::new(CountingSession {
                closes: self.closes.clone(),
            }))
        }
    }

    fn config() -> AppConfig {
        let env = |key: &str| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "OPENAI_BASE_URL" => Some("http://127.0.0.1:1/v1".to_string()),
            "MODEL_NAME" => Some("test-model".to_string()),
            _ => None,
        };
        AppConfig::from_lookup(env, RuntimeConfig::default()).unwrap()
    }

    fn descriptor(name: &str) -> ServerDescriptor {
        ServerDescriptor {
            name: name.into(),
            transport: TransportSpec::Process {
                command: format!("{name}-mcp"),
                args: vec![],
                env: BTreeMap::new(),
            },
            cache_tools_list: true,
        }
    }

    #[test]
    fn broken_server_document_means_no_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, r#"{"servers": [ not json"#).unwrap();

        assert!(servers_or_none(&path).is_empty());
    }

    #[test]
    fn readable_server_document_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, r#"{"servers": [{"name": "web", "url": "http://localhost:8000/sse"}]}"#)
            .unwrap();

        let servers = servers_or_none(&path);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "web");
    }

    #[tokio::test]
    async fn prepare_survives_a_broken_server_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "{\"servers\": [").unwrap();
        let options = StartOptions {
            servers_path: Some(path),
            connect_tools: true,
        };

        let runtime = Runtime::prepare(config(), &options).unwrap();

        assert!(runtime.registry.is_empty());
        assert!(runtime.tool_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_connect_still_cleans_up() {
        let closes = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(SlowConnector {
            stalled: ["stalled".to_string()].into(),
            closes: closes.clone(),
        });
        let mut runtime = Runtime::assemble(
            config(),
            Arc::new(SilentModel),
            connector,
            vec![descriptor("ready"), descriptor("stalled")],
        )
        .unwrap();

        let finish = runtime
            .serve(Session::Tools, tokio::time::sleep(Duration::from_secs(3)))
            .await
            .unwrap();
        assert_eq!(finish, Finish::Interrupted);

        let report = runtime.shutdown().await;
        assert_eq!(report.closed, vec!["ready", "stalled"]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connected_providers_reach_the_agent() {
        let connector = Arc::new(SlowConnector {
            stalled: HashSet::new(),
            closes: Arc::new(AtomicUsize::new(0)),
        });
        let mut runtime = Runtime::assemble(
            config(),
            Arc::new(SilentModel),
            connector,
            vec![descriptor("nmap"), descriptor("web")],
        )
        .unwrap();
        assert!(runtime.tool_names().is_empty());

        let finish = runtime
            .serve(Session::Tools, std::future::pending())
            .await
            .unwrap();

        assert_eq!(finish, Finish::Completed);
        assert_eq!(runtime.tool_names(), ["nmap".to_string(), "web".to_string()]);
    }
}
