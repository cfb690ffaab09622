use super::{PendingRequests, Transport, TransportError, TransportHandle, TransportMessage};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Talks to a remote tool provider over server-sent events.
///
/// The server announces a POST endpoint in an `endpoint` event; requests are
/// POSTed there and responses come back as `message` events.
pub struct SseTransport {
    name: String,
    url: String,
    connect_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<PendingRequests>,
}

impl SseTransport {
    pub fn new(name: impl Into<String>, url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            connect_timeout,
            tasks: Mutex::new(Vec::new()),
            pending: Arc::new(PendingRequests::new()),
        }
    }

    /// Route events from the server until its stream ends: the first
    /// `endpoint` event resolves `endpoint_tx`, `message` events answer
    /// pending requests.
    async fn read_events<S, B, E>(
        body: S,
        base_url: String,
        endpoint_tx: oneshot::Sender<Result<String, TransportError>>,
        pending: Arc<PendingRequests>,
        name: String,
    ) where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut events = pin!(body.eventsource());

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Event stream interrupted");
                    break;
                }
            };

            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let resolved = reqwest::Url::parse(&base_url)
                            .and_then(|base| base.join(event.data.trim()))
                            .map(|url| url.to_string())
                            .map_err(|e| TransportError::SseConnection(e.to_string()));
                        let _ = tx.send(resolved);
                    }
                }
                "" | "message" => pending.dispatch(&event.data).await,
                other => debug!(provider = %name, event = other, "Ignoring SSE event"),
            }
        }

        if let Some(tx) = endpoint_tx.take() {
            let _ = tx.send(Err(TransportError::ConnectionClosed));
        }
        pending.fail_all(TransportError::ConnectionClosed).await;
    }

    async fn post_requests(
        mut message_rx: mpsc::Receiver<TransportMessage>,
        client: reqwest::Client,
        endpoint: String,
        pending: Arc<PendingRequests>,
    ) {
        while let Some(message) = message_rx.recv().await {
            let id = message.id.clone();
            if let (Some(id), Some(tx)) = (message.id, message.response_tx) {
                pending.insert(id, tx).await;
            }

            let result = client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .body(message.payload)
                .send()
                .await;

            let failure = match result {
                Ok(response) if response.status().is_success() => None,
                Ok(response) => Some(TransportError::Http {
                    status: response.status().as_u16(),
                    message: response.text().await.unwrap_or_default(),
                }),
                Err(_) => Some(TransportError::SendFailed),
            };

            if let (Some(error), Some(id)) = (failure, id) {
                pending.respond(&id, Err(error)).await;
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<TransportHandle, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| TransportError::SseConnection(e.to_string()))?;

        let response = client
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::SseConnection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http {
                status: response.status().as_u16(),
                message: format!("event stream request to {} rejected", self.url),
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(Self::read_events(
            response.bytes_stream(),
            self.url.clone(),
            endpoint_tx,
            self.pending.clone(),
            self.name.clone(),
        ));

        let endpoint = match tokio::time::timeout(self.connect_timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(e))) => {
                reader.abort();
                return Err(e);
            }
            Ok(Err(_)) => {
                reader.abort();
                return Err(TransportError::ConnectionClosed);
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::Timeout);
            }
        };
        debug!(provider = %self.name, %endpoint, "Tool provider announced endpoint");

        let (message_tx, message_rx) = mpsc::channel(32);
        let writer = tokio::spawn(Self::post_requests(
            message_rx,
            client,
            endpoint,
            self.pending.clone(),
        ));
        self.tasks.lock().await.extend([reader, writer]);

        Ok(TransportHandle::new(message_tx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.pending.fail_all(TransportError::ConnectionClosed).await;
        Ok(())
    }
}
