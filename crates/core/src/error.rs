//! Error types for the redscope domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for redscope operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Tool provider lifecycle errors ---
    #[error("Tool provider error: {0}")]
    ToolProvider(#[from] ToolProviderError),

    // --- Knowledge retrieval errors ---
    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Workflow errors ---
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this error means the connection to the model was lost.
    ///
    /// These are the failures the stream router answers with a single
    /// delayed reconnect attempt.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::StreamInterrupted(_) | Self::Network(_) | Self::Timeout(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures of a single tool provider's lifecycle.
#[derive(Debug, Clone, Error)]
pub enum ToolProviderError {
    #[error("Failed to spawn tool provider '{name}': {reason}")]
    Spawn { name: String, reason: String },

    #[error("Tool provider '{name}' is unreachable: {reason}")]
    Unreachable { name: String, reason: String },

    #[error("Handshake with tool provider '{name}' failed: {reason}")]
    Handshake { name: String, reason: String },

    #[error("Tool provider '{0}' is not connected")]
    NotConnected(String),

    #[error("Tool provider '{name}' returned an error: {reason}")]
    Protocol { name: String, reason: String },

    #[error("Cleanup of tool provider '{name}' failed: {reason}")]
    Cleanup { name: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("Knowledge source unavailable: {0}")]
    Unavailable(String),

    #[error("Knowledge retrieval failed: {0}")]
    RetrievalFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("No dialogue turn with ordinal {0}")]
    UnknownOrdinal(u64),

    #[error("Dialogue turn {0} already has a response")]
    ResponseAlreadyRecorded(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Workflow target must not be empty")]
    EmptyTarget,

    #[error("Agent mode needs a goal")]
    EmptyGoal,

    #[error("Invalid workflow definition '{key}': {reason}")]
    InvalidDefinition { key: String, reason: String },
}
