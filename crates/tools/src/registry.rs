//! ToolProviderRegistry: owns every configured tool provider and its lifecycle.
//!
//! Each provider moves forward through
//! `Uninitialized -> Connecting -> Connected | Failed -> Closed` and never back.
//! Connect and cleanup run per provider in their own task, so an error or
//! panic in one provider is contained at that provider's boundary.

use crate::connector::{Connector, ToolSession};
use crate::invoker::{ConnectedProvider, ConnectedTools};
use redscope_config::ServerDescriptor;
use redscope_core::tool::ToolDefinition;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ProviderState {
    fn rank(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Connecting => 1,
            Self::Connected | Self::Failed => 2,
            Self::Closed => 3,
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// One configured tool provider.
pub struct ToolProvider {
    descriptor: ServerDescriptor,
    state: ProviderState,
    session: Option<Arc<dyn ToolSession>>,
    cached_tools: Arc<Mutex<Option<Vec<ToolDefinition>>>>,
    last_error: Option<String>,
}

impl ToolProvider {
    fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            state: ProviderState::Uninitialized,
            session: None,
            cached_tools: Arc::new(Mutex::new(None)),
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    /// Why the last connect or cleanup failed, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Move forward only. Returns false (and stays put) on a backward move.
    fn advance(&mut self, next: ProviderState) -> bool {
        if next.rank() <= self.state.rank() {
            warn!(
                provider = %self.descriptor.name,
                from = %self.state,
                to = %next,
                "Refusing backward tool provider transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    fn as_connected(&self) -> Option<ConnectedProvider> {
        let session = self.session.clone()?;
        (self.state == ProviderState::Connected).then(|| {
            ConnectedProvider::new(
                self.descriptor.name.clone(),
                session,
                self.descriptor.cache_tools_list,
                self.cached_tools.clone(),
            )
        })
    }
}

/// Tally returned by [`ToolProviderRegistry::cleanup_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Providers released (or with nothing to release)
    pub closed: Vec<String>,
    /// Providers whose cleanup returned an error, with the reason
    pub failed: Vec<(String, String)>,
    /// Providers whose cleanup did not finish in time
    pub timed_out: Vec<String>,
    /// Providers that were already closed
    pub already_closed: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "closed {}, failed {}, timed out {}, already closed {}",
            self.closed.len(),
            self.failed.len(),
            self.timed_out.len(),
            self.already_closed
        )
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ToolProviderRegistry {
    providers: Vec<ToolProvider>,
    connector: Arc<dyn Connector>,
    cleanup_timeout: Duration,
}

impl ToolProviderRegistry {
    pub fn new(connector: Arc<dyn Connector>, cleanup_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            connector,
            cleanup_timeout,
        }
    }

    /// Record providers without connecting. A name that is already
    /// registered is skipped.
    pub fn register(&mut self, entries: impl IntoIterator<Item = ServerDescriptor>) {
        for descriptor in entries {
            if self.providers.iter().any(|p| p.name() == descriptor.name) {
                warn!(provider = %descriptor.name, "Duplicate tool provider name, skipping");
                continue;
            }
            debug!(provider = %descriptor.name, "Registered tool provider");
            self.providers.push(ToolProvider::new(descriptor));
        }
    }

    pub fn providers(&self) -> &[ToolProvider] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Connect every provider that has not been attempted yet.
    ///
    /// Attempts run one after another; a failure marks only that provider
    /// `Failed`. Returns the connected providers in registration order.
    ///
    /// Dropping the returned future abandons the attempt in flight: its task
    /// is aborted, that provider stays `Connecting`, and providers already
    /// connected keep their sessions for [`cleanup_all`](Self::cleanup_all).
    pub async fn connect_all(&mut self) -> Vec<ConnectedProvider> {
        for provider in &mut self.providers {
            if provider.state != ProviderState::Uninitialized {
                continue;
            }
            provider.advance(ProviderState::Connecting);

            let connector = self.connector.clone();
            let descriptor = provider.descriptor.clone();
            let attempt = tokio::spawn(async move { connector.connect(&descriptor).await });
            let _abandon = AbortOnDrop(attempt.abort_handle());

            match attempt.await {
                Ok(Ok(session)) => {
                    provider.session = Some(session);
                    provider.advance(ProviderState::Connected);
                    info!(provider = %provider.name(), "Tool provider connected");
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider.name(), error = %e, "Tool provider failed to connect");
                    provider.last_error = Some(e.to_string());
                    provider.advance(ProviderState::Failed);
                }
                Err(join_error) => {
                    warn!(provider = %provider.name(), error = %join_error, "Tool provider connect task aborted");
                    provider.last_error = Some(join_error.to_string());
                    provider.advance(ProviderState::Failed);
                }
            }
        }

        self.connected()
    }

    /// Connected providers in registration order.
    pub fn connected(&self) -> Vec<ConnectedProvider> {
        self.providers
            .iter()
            .filter_map(ToolProvider::as_connected)
            .collect()
    }

    /// Names of the connected providers, in registration order.
    pub fn connected_names(&self) -> Vec<String> {
        self.connected().into_iter().map(|p| p.name).collect()
    }

    /// A `ToolInvoker` over the currently connected providers.
    pub fn tools(&self) -> ConnectedTools {
        ConnectedTools::new(self.connected())
    }

    /// Best-effort release of every provider, connected or not.
    ///
    /// Never fails: each provider's cleanup runs in its own task bounded by
    /// the cleanup timeout, and every outcome lands in the returned tally.
    /// A provider that times out is left to finish in the background.
    /// Calling this again only counts the providers as already closed.
    pub async fn cleanup_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for provider in &mut self.providers {
            if provider.state == ProviderState::Closed {
                report.already_closed += 1;
                continue;
            }

            let name = provider.name().to_string();
            let session = provider.session.take();
            provider.advance(ProviderState::Closed);

            let Some(session) = session else {
                debug!(provider = %name, "Nothing to release");
                report.closed.push(name);
                continue;
            };

            let task = tokio::spawn(async move { session.close().await });
            match tokio::time::timeout(self.cleanup_timeout, task).await {
                Ok(Ok(Ok(()))) => {
                    debug!(provider = %name, "Tool provider closed");
                    report.closed.push(name);
                }
                Ok(Ok(Err(e))) => {
                    warn!(provider = %name, error = %e, "Tool provider cleanup failed");
                    provider.last_error = Some(e.to_string());
                    report.failed.push((name, e.to_string()));
                }
                Ok(Err(join_error)) => {
                    warn!(provider = %name, error = %join_error, "Tool provider cleanup task aborted");
                    report.failed.push((name, join_error.to_string()));
                }
                Err(_) => {
                    warn!(
                        provider = %name,
                        timeout_secs = self.cleanup_timeout.as_secs(),
                        "Tool provider cleanup timed out"
                    );
                    report.timed_out.push(name);
                }
            }
        }

        info!(%report, "Tool provider cleanup finished");
        report
    }
}
