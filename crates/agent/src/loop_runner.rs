//! The model/tool loop behind a single turn.
//!
//! [`ToolLoop::spawn`] runs in its own task and reports progress as
//! [`StreamEvent`]s on a channel:
//!
//! 1. **Send** the messages to the model and stream its text as `TextDelta`s
//! 2. **If tool calls**: emit `ToolInvocation`, call the tool, emit
//!    `ToolResult`, append both to the messages and loop back to step 1
//! 3. **If text only**: emit `ContentBoundary` and close the channel
//!
//! Provider errors are forwarded as `Err` items and end the loop. The loop
//! also stops at the configured round limit, or as soon as the receiver
//! goes away.

use crate::stream_router::{EventReceiver, decode_tool_arguments, render_tool_output};
use redscope_config::ModelSettings;
use redscope_core::error::ProviderError;
use redscope_core::message::{Message, MessageToolCall};
use redscope_core::provider::{ModelProvider, ProviderRequest};
use redscope_core::stream_event::StreamEvent;
use redscope_core::tool::ToolInvoker;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 64;

type EventSender = mpsc::Sender<Result<StreamEvent, ProviderError>>;

/// Sampling parameters for every round of one turn.
#[derive(Debug, Clone)]
pub struct RoundSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// The planned reply budget.
    pub max_tokens: u32,
    pub max_tool_rounds: usize,
}

impl RoundSettings {
    pub fn new(model: impl Into<String>, settings: &ModelSettings, max_tokens: usize) -> Self {
        Self {
            model: model.into(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: u32::try_from(max_tokens).unwrap_or(u32::MAX),
            max_tool_rounds: settings.max_tool_rounds,
        }
    }
}

pub struct ToolLoop {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<dyn ToolInvoker>,
    settings: RoundSettings,
}

impl ToolLoop {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolInvoker>,
        settings: RoundSettings,
    ) -> Self {
        Self {
            provider,
            tools,
            settings,
        }
    }

    /// Start the loop over `messages` and return its event stream.
    pub fn spawn(self, messages: Vec<Message>) -> EventReceiver {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            self.run(messages, tx).await;
        });
        rx
    }

    async fn run(self, mut messages: Vec<Message>, tx: EventSender) {
        let definitions = self.tools.definitions().await;
        let parallel_tool_calls = (!definitions.is_empty()).then_some(false);

        for round in 1..=self.settings.max_tool_rounds {
            debug!(round, messages = messages.len(), "Model round");

            let request = ProviderRequest {
                model: self.settings.model.clone(),
                messages: messages.clone(),
                temperature: self.settings.temperature,
                top_p: Some(self.settings.top_p),
                max_tokens: Some(self.settings.max_tokens),
                tools: definitions.clone(),
                parallel_tool_calls,
            };

            let mut chunks = match self.provider.stream(request).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut text = String::new();
            let mut calls: Vec<MessageToolCall> = Vec::new();

            while let Some(item) = chunks.recv().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                if let Some(delta) = chunk.content.filter(|c| !c.is_empty()) {
                    text.push_str(&delta);
                    if tx.send(Ok(StreamEvent::text(delta))).await.is_err() {
                        return;
                    }
                }

                if chunk.done {
                    calls = chunk.tool_calls;
                    break;
                }
            }

            if !text.is_empty() && tx.send(Ok(StreamEvent::ContentBoundary)).await.is_err() {
                return;
            }

            if calls.is_empty() {
                return;
            }

            debug!(tool_count = calls.len(), "Executing tool calls");
            messages.push(Message::assistant_tool_calls(text, calls.clone()));

            for call in calls {
                if !self.execute(call, &mut messages, &tx).await {
                    return;
                }
            }
        }

        warn!(
            max_tool_rounds = self.settings.max_tool_rounds,
            "Tool round limit reached, ending turn"
        );
    }

    /// Run one tool call. Returns `false` once the receiver is gone.
    async fn execute(
        &self,
        call: MessageToolCall,
        messages: &mut Vec<Message>,
        tx: &EventSender,
    ) -> bool {
        let invocation = StreamEvent::ToolInvocation {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };
        if tx.send(Ok(invocation)).await.is_err() {
            return false;
        }

        let arguments = decode_tool_arguments(&call.arguments);
        let output = match self.tools.invoke(&call.name, arguments).await {
            Ok(output) => output,
            Err(e) => {
                // Reported back to the model so it can recover
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                json!({ "text": format!("Error: {e}"), "isError": true })
            }
        };

        messages.push(Message::tool_result(&call.id, render_tool_output(&output)));

        let result = StreamEvent::ToolResult {
            call_id: call.id,
            output,
        };
        tx.send(Ok(result)).await.is_ok()
    }
}
