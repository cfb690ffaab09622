//! Events produced while the model answers a single turn.
//!
//! This is a closed set: the stream router matches on it exhaustively, so a
//! new event kind is a compile-time change everywhere it is consumed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A piece of response text.
    TextDelta { text: String },

    /// The model finished a block of content.
    ContentBoundary,

    /// The model asked for a tool. `arguments` is the raw text it produced.
    ToolInvocation { name: String, arguments: String },

    /// A tool finished. `output` is structured data or a JSON string.
    ToolResult {
        call_id: String,
        output: serde_json::Value,
    },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Returns the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ContentBoundary => "content_boundary",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}
