//! # redscope core
//!
//! Domain types, traits, and error definitions for the redscope
//! orchestration runtime. Every other crate depends inward on this one.
//!
//! ## Design Philosophy
//!
//! The seams to external collaborators are traits defined here:
//! - [`ModelProvider`] streams completions from a language model
//! - [`ToolInvoker`] lists and calls tools exposed by tool providers
//! - [`KnowledgeSource`] retrieves an optional knowledge excerpt
//!
//! Implementations live in their respective crates, and tests substitute
//! scripted in-memory versions.

pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod stream_event;
pub mod tool;

pub use error::{Error, Result};
pub use knowledge::KnowledgeSource;
pub use message::{Message, MessageToolCall, Role};
pub use provider::{ModelProvider, ProviderRequest, StreamChunk, Usage};
pub use stream_event::StreamEvent;
pub use tool::{NoTools, ToolDefinition, ToolInvoker};
