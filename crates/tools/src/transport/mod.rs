//! Channel-based transports for tool providers.
//!
//! A transport owns the connection (child process or HTTP event stream).
//! Callers talk to it through a cloneable [`TransportHandle`]; responses are
//! matched to requests by JSON-RPC id through [`PendingRequests`].

pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};

/// Errors from transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transport was not connected or is already closed")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("SSE connection error: {0}")]
    SseConnection(String),

    #[error("Connection closed by server")]
    ConnectionClosed,
}

type ResponseSender = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;

/// A serialized message queued for the transport.
#[derive(Debug)]
pub struct TransportMessage {
    /// Pending-request key; `None` for notifications
    pub id: Option<String>,
    /// The serialized JSON-RPC message
    pub payload: String,
    /// Where to deliver the response (None for notifications)
    pub response_tx: Option<ResponseSender>,
}

/// A generic asynchronous transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the underlying connection and return a handle for sending.
    async fn start(&self) -> Result<TransportHandle, TransportError>;

    /// Release the connection. Closing an unstarted or closed transport is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportMessage>,
}

impl TransportHandle {
    pub fn new(sender: mpsc::Sender<TransportMessage>) -> Self {
        Self { sender }
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let payload =
            serde_json::to_string(request).map_err(|e| TransportError::Serialization(e.to_string()))?;
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(TransportMessage {
                id: Some(request.id.to_string()),
                payload,
                response_tx: Some(respond_to),
            })
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        response.await.map_err(|_| TransportError::ChannelClosed)?
    }

    /// Send a notification; there is no response.
    pub async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), TransportError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.sender
            .send(TransportMessage {
                id: None,
                payload,
                response_tx: None,
            })
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Requests waiting for a response, keyed by JSON-RPC id.
#[derive(Default)]
pub struct PendingRequests {
    requests: Mutex<HashMap<String, ResponseSender>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: String, sender: ResponseSender) {
        self.requests.lock().await.insert(id, sender);
    }

    pub async fn respond(&self, id: &str, response: Result<JsonRpcResponse, TransportError>) {
        if let Some(tx) = self.requests.lock().await.remove(id) {
            let _ = tx.send(response);
        }
    }

    /// Fail every outstanding request with `error`.
    pub async fn fail_all(&self, error: TransportError) {
        for (_, tx) in self.requests.lock().await.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Route an inbound line to its pending request. Non-responses are ignored.
    pub async fn dispatch(&self, raw: &str) {
        match serde_json::from_str::<JsonRpcResponse>(raw) {
            Ok(message) => {
                if let Some(key) = message.response_key() {
                    self.respond(&key, Ok(message)).await;
                } else {
                    tracing::trace!(method = ?message.method, "Ignoring server-initiated message");
                }
            }
            Err(e) => tracing::trace!(error = %e, "Ignoring non-JSON-RPC output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatch_routes_to_matching_request() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending.insert("4".into(), tx).await;

        pending.dispatch(r#"{"jsonrpc":"2.0","id":4,"result":{"ok":true}}"#).await;

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.result, Some(json!({"ok": true})));
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn dispatch_ignores_noise() {
        let pending = PendingRequests::new();
        let (tx, _rx) = oneshot::channel();
        pending.insert("1".into(), tx).await;

        pending.dispatch("Starting scanner v2.1...").await;
        pending.dispatch(r#"{"jsonrpc":"2.0","method":"notifications/message"}"#).await;

        assert_eq!(pending.len().await, 1);
    }

    #[tokio::test]
    async fn fail_all_drains_requests() {
        let pending = PendingRequests::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert("1".into(), tx1).await;
        pending.insert("2".into(), tx2).await;

        pending.fail_all(TransportError::ConnectionClosed).await;

        assert!(matches!(rx1.await.unwrap(), Err(TransportError::ConnectionClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(TransportError::ConnectionClosed)));
        assert_eq!(pending.len().await, 0);
    }

    #[tokio::test]
    async fn handle_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = TransportHandle::new(tx);
        let err = handle
            .request(&JsonRpcRequest::new(1, "ping", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed));
    }
}
