//! Tool providers for redscope.
//!
//! A tool provider is an external process or remote endpoint speaking the
//! Model Context Protocol (JSON-RPC 2.0). This crate contains:
//! - [`transport`]: child-process stdio and SSE transports
//! - [`client`]: the protocol client (handshake, `tools/list`, `tools/call`)
//! - [`registry`]: the [`ToolProviderRegistry`] owning every provider's lifecycle
//! - [`invoker`]: [`ConnectedTools`], the `ToolInvoker` over connected providers

pub mod client;
pub mod connector;
pub mod invoker;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use client::{ClientError, McpClient};
pub use connector::{Connector, McpConnector, ToolSession};
pub use invoker::{ConnectedProvider, ConnectedTools};
pub use registry::{CleanupReport, ProviderState, ToolProvider, ToolProviderRegistry};
