//! Shared test doubles for the agent crate.

use async_trait::async_trait;
use redscope_core::error::{ProviderError, ToolError};
use redscope_core::message::MessageToolCall;
use redscope_core::provider::{ChunkReceiver, ModelProvider, ProviderRequest, StreamChunk};
use redscope_core::tool::{ToolDefinition, ToolInvoker};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub type Round = Vec<Result<StreamChunk, ProviderError>>;

/// A provider that answers each `stream` call with the next scripted round.
///
/// Panics if more calls are made than rounds provided.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<ProviderRequest>>,
    reconnects: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
            reconnects: Mutex::new(0),
        }
    }

    /// One round that streams `parts` and finishes.
    pub fn text(parts: &[&str]) -> Self {
        Self::new(vec![text_round(parts)])
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reconnects(&self) -> usize {
        *self.reconnects.lock().unwrap()
    }
}

pub fn text_round(parts: &[&str]) -> Round {
    let mut round: Round = parts.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
    round.push(Ok(StreamChunk::finished(vec![])));
    round
}

pub fn tool_round(calls: &[(&str, &str, &str)]) -> Round {
    let calls = calls
        .iter()
        .map(|(id, name, args)| MessageToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        })
        .collect();
    vec![Ok(StreamChunk::finished(calls))]
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more rounds");

        let (tx, rx) = mpsc::channel(round.len().max(1));
        for item in round {
            tx.try_send(item).unwrap();
        }
        Ok(rx)
    }

    async fn reconnect(&self) -> Result<(), ProviderError> {
        *self.reconnects.lock().unwrap() += 1;
        Ok(())
    }
}

/// Tools that echo their arguments back as MCP-style content.
pub struct EchoTools {
    pub names: Vec<&'static str>,
    pub calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl EchoTools {
    pub fn new(names: Vec<&'static str>) -> Self {
        Self {
            names,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolInvoker for EchoTools {
    async fn definitions(&self) -> Vec<ToolDefinition> {
        self.names
            .iter()
            .map(|n| ToolDefinition {
                name: n.to_string(),
                description: format!("{n} tool"),
                parameters: json!({"type": "object"}),
            })
            .collect()
    }

    async fn invoke(&self, name: &str, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        if !self.names.contains(&name) {
            return Err(ToolError::NotFound(name.to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        Ok(json!({"content": [{"type": "text", "text": format!("{name} -> {}", Value::Object(arguments))}]}))
    }
}
