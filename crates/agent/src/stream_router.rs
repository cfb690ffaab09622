//! StreamEventRouter: drains one turn's event stream into a display sink.
//!
//! Text is accumulated into the turn's output. Tool invocations and results
//! are shown but not accumulated. A lost connection to the model is answered
//! with exactly one fixed-delay wait and one reconnect attempt, after which
//! the turn ends with whatever text it had. Other provider errors end the
//! turn immediately. Neither case is an error to the caller.

use redscope_core::error::ProviderError;
use redscope_core::provider::ModelProvider;
use redscope_core::stream_event::StreamEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type EventReceiver = mpsc::Receiver<Result<StreamEvent, ProviderError>>;

/// Where routed events end up. The CLI writes to the terminal; tests record.
pub trait DisplaySink: Send {
    /// Show a piece of response text without a trailing newline.
    fn text(&mut self, text: &str);

    /// Flush anything buffered by [`text`](Self::text).
    fn flush(&mut self);

    fn tool_invocation(&mut self, name: &str, arguments: &Map<String, Value>);

    fn tool_result(&mut self, call_id: &str, output: &str);

    /// A status line outside the model's own output.
    fn notice(&mut self, message: &str);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn text(&mut self, _text: &str) {}
    fn flush(&mut self) {}
    fn tool_invocation(&mut self, _name: &str, _arguments: &Map<String, Value>) {}
    fn tool_result(&mut self, _call_id: &str, _output: &str) {}
    fn notice(&mut self, _message: &str) {}
}

/// What a [`RecordingSink`] saw.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEntry {
    Text(String),
    Flush,
    ToolInvocation { name: String, arguments: Map<String, Value> },
    ToolResult { call_id: String, output: String },
    Notice(String),
}

/// Keeps every call in order. Cloning shares the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    entries: std::sync::Arc<std::sync::Mutex<Vec<SinkEntry>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<SinkEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn push(&self, entry: SinkEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl DisplaySink for RecordingSink {
    fn text(&mut self, text: &str) {
        self.push(SinkEntry::Text(text.to_string()));
    }

    fn flush(&mut self) {
        self.push(SinkEntry::Flush);
    }

    fn tool_invocation(&mut self, name: &str, arguments: &Map<String, Value>) {
        self.push(SinkEntry::ToolInvocation {
            name: name.to_string(),
            arguments: arguments.clone(),
        });
    }

    fn tool_result(&mut self, call_id: &str, output: &str) {
        self.push(SinkEntry::ToolResult {
            call_id: call_id.to_string(),
            output: output.to_string(),
        });
    }

    fn notice(&mut self, message: &str) {
        self.push(SinkEntry::Notice(message.to_string()));
    }
}

/// Why a turn ended early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interruption {
    /// The connection dropped and the single reconnect attempt succeeded.
    Reconnected { error: String },
    /// The connection dropped and could not be re-established.
    ReconnectFailed { error: String, reconnect_error: String },
    /// The provider rejected or aborted the turn.
    Failed { error: String },
}

impl Interruption {
    pub fn error(&self) -> &str {
        match self {
            Self::Reconnected { error }
            | Self::ReconnectFailed { error, .. }
            | Self::Failed { error } => error,
        }
    }
}

/// The result of routing one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedOutput {
    /// Concatenation of every text delta, in order.
    pub text: String,
    pub interruption: Option<Interruption>,
}

#[derive(Debug, Clone)]
pub struct StreamEventRouter {
    reconnect_delay: Duration,
}

impl StreamEventRouter {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self { reconnect_delay }
    }

    pub async fn route(
        &self,
        events: &mut EventReceiver,
        sink: &mut dyn DisplaySink,
        provider: &dyn ModelProvider,
    ) -> RoutedOutput {
        let mut output = RoutedOutput::default();

        while let Some(item) = events.recv().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    sink.flush();
                    output.interruption = Some(self.recover(e, sink, provider).await);
                    break;
                }
            };

            match event {
                StreamEvent::TextDelta { text } => {
                    sink.text(&text);
                    output.text.push_str(&text);
                }
                StreamEvent::ContentBoundary => sink.flush(),
                StreamEvent::ToolInvocation { name, arguments } => {
                    debug!(tool = %name, "Model requested tool");
                    sink.tool_invocation(&name, &decode_tool_arguments(&arguments));
                }
                StreamEvent::ToolResult { call_id, output: result } => {
                    sink.tool_result(&call_id, &render_tool_output(&result));
                }
            }
        }

        sink.flush();
        output
    }

    async fn recover(
        &self,
        error: ProviderError,
        sink: &mut dyn DisplaySink,
        provider: &dyn ModelProvider,
    ) -> Interruption {
        let message = error.to_string();

        if !error.is_transport() {
            warn!(error = %message, "Model stream failed");
            sink.notice(&format!("Model error: {message}"));
            return Interruption::Failed { error: message };
        }

        warn!(
            error = %message,
            delay_secs = self.reconnect_delay.as_secs(),
            "Lost connection to model, reconnecting"
        );
        sink.notice(&format!(
            "Connection lost ({message}). Reconnecting in {}s...",
            self.reconnect_delay.as_secs()
        ));
        tokio::time::sleep(self.reconnect_delay).await;

        match provider.reconnect().await {
            Ok(()) => {
                info!(provider = provider.name(), "Reconnected to model");
                sink.notice("Reconnected. The previous answer may be incomplete.");
                Interruption::Reconnected { error: message }
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Reconnect failed");
                sink.notice(&format!("Reconnect failed: {e}"));
                Interruption::ReconnectFailed {
                    error: message,
                    reconnect_error: e.to_string(),
                }
            }
        }
    }
}

/// Decode the model's raw argument text into an object.
///
/// Empty text is an empty object. Anything that is not a JSON object is kept
/// under `raw_arguments` so it can still be shown.
pub fn decode_tool_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("raw_arguments".into(), Value::String(raw.to_string()));
            map
        }
    }
}

pub const UNPARSABLE_MARKER: &str = "[unparsable tool output]";

/// Turn a tool's output into display text.
///
/// String output is decoded as JSON first; text that does not decode is
/// shown as-is behind [`UNPARSABLE_MARKER`]. Decoded output with a `text`
/// field, a string `content`, or MCP-style `content` blocks shows that text.
/// Any other shape is pretty-printed whole.
pub fn render_tool_output(output: &Value) -> String {
    match output {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(decoded) => render_structured(&decoded),
            Err(_) => format!("{UNPARSABLE_MARKER} {raw}"),
        },
        other => render_structured(other),
    }
}

fn render_structured(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let Some(text) = map.get("text").and_then(Value::as_str) {
            return text.to_string();
        }
        match map.get("content") {
            Some(Value::String(content)) => return content.clone(),
            Some(Value::Array(blocks)) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect();
                if !texts.is_empty() {
                    return texts.join("\n");
                }
            }
            _ => {}
        }
    }
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
