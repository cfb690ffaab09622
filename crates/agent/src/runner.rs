//! Single-turn invocation: query in, streamed answer out.
//!
//! [`AgentRunner`] owns everything a turn needs: the model provider, the
//! tool set, the optional knowledge source and the display sink. Each call
//! to [`TurnInvoker::invoke`] retrieves knowledge, assembles instructions
//! from the current history, plans the reply budget, runs the tool loop and
//! routes its events. The caller decides what to record in history.

use crate::context::{ContextBudgetPlanner, DEFAULT_PERSONA, PromptAssembler, TokenCounter, persona_with_tool_providers};
use crate::history::ConversationHistoryStore;
use crate::loop_runner::{RoundSettings, ToolLoop};
use crate::stream_router::{DisplaySink, Interruption, StreamEventRouter};
use async_trait::async_trait;
use redscope_config::RuntimeConfig;
use redscope_core::knowledge::KnowledgeSource;
use redscope_core::message::Message;
use redscope_core::provider::ModelProvider;
use redscope_core::tool::{NoTools, ToolInvoker};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Everything needed to run turns, shared by the interactive loop and the
/// workflow engine.
#[derive(Clone)]
pub struct AgentContext {
    pub provider: Arc<dyn ModelProvider>,
    pub tools: Arc<dyn ToolInvoker>,
    /// Names of the connected tool providers, listed in the persona.
    pub tool_providers: Vec<String>,
    pub knowledge: Option<Arc<dyn KnowledgeSource>>,
    pub persona: String,
    pub model: String,
    pub runtime: RuntimeConfig,
    pub counter: Arc<TokenCounter>,
}

impl AgentContext {
    /// A context with no tools and no knowledge source.
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>, runtime: RuntimeConfig) -> Self {
        let counter = Arc::new(TokenCounter::from_config(runtime.tokenizer_path.as_deref()));
        Self {
            provider,
            tools: Arc::new(NoTools),
            tool_providers: Vec::new(),
            knowledge: None,
            persona: DEFAULT_PERSONA.to_string(),
            model: model.into(),
            runtime,
            counter,
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>, provider_names: Vec<String>) -> Self {
        self.tools = tools;
        self.tool_providers = provider_names;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// The persona extended with the connected tool providers.
    pub fn effective_persona(&self) -> String {
        persona_with_tool_providers(&self.persona, &self.tool_providers)
    }

    /// An empty history sized by this context's limits.
    pub fn new_history(&self) -> ConversationHistoryStore {
        ConversationHistoryStore::from_config(self.counter.clone(), &self.runtime.history)
    }
}

/// The result of one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Accumulated response text. May be partial if the turn was interrupted.
    pub output: String,
    /// The reply budget the turn was planned with.
    pub max_tokens: usize,
    pub interruption: Option<Interruption>,
}

impl TurnOutcome {
    pub fn is_complete(&self) -> bool {
        self.interruption.is_none()
    }
}

/// Runs one turn against the current history.
#[async_trait]
pub trait TurnInvoker: Send + Sync {
    async fn invoke(&self, query: &str, history: &ConversationHistoryStore) -> TurnOutcome;
}

pub struct AgentRunner {
    ctx: AgentContext,
    planner: ContextBudgetPlanner,
    assembler: PromptAssembler,
    router: StreamEventRouter,
    sink: Mutex<Box<dyn DisplaySink>>,
}

impl AgentRunner {
    pub fn new(ctx: AgentContext, sink: Box<dyn DisplaySink>) -> Self {
        let planner = ContextBudgetPlanner::new(ctx.counter.clone());
        let router = StreamEventRouter::new(ctx.runtime.timing.reconnect_delay());
        Self {
            ctx,
            planner,
            assembler: PromptAssembler::new(),
            router,
            sink: Mutex::new(sink),
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Instructions for `query` given the retained history.
    pub async fn instructions_for(&self, query: &str, history: &ConversationHistoryStore) -> String {
        let excerpt = self
            .assembler
            .retrieve_excerpt(self.ctx.knowledge.as_deref(), query)
            .await;
        self.assembler.assemble_instructions(
            &self.ctx.effective_persona(),
            excerpt.as_deref(),
            &history.snapshot(),
        )
    }
}

#[async_trait]
impl TurnInvoker for AgentRunner {
    async fn invoke(&self, query: &str, history: &ConversationHistoryStore) -> TurnOutcome {
        let instructions = self.instructions_for(query, history).await;
        let max_tokens = self.planner.plan(&instructions, query, &self.ctx.runtime.budget);

        info!(
            history_turns = history.len(),
            instruction_tokens = self.planner.estimate_tokens(&instructions),
            max_tokens,
            "Starting turn"
        );

        let settings = RoundSettings::new(self.ctx.model.clone(), &self.ctx.runtime.model, max_tokens);
        let mut events = ToolLoop::new(self.ctx.provider.clone(), self.ctx.tools.clone(), settings)
            .spawn(vec![Message::system(instructions), Message::user(query)]);

        let mut sink = self.sink.lock().await;
        let routed = self
            .router
            .route(&mut events, &mut **sink, self.ctx.provider.as_ref())
            .await;

        debug!(chars = routed.text.len(), interrupted = routed.interruption.is_some(), "Turn finished");
        TurnOutcome {
            output: routed.text,
            max_tokens,
            interruption: routed.interruption,
        }
    }
}
