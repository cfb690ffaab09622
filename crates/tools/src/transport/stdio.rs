use super::{PendingRequests, Transport, TransportError, TransportHandle, TransportMessage};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Talks to a tool provider over a child process's stdin/stdout,
/// one JSON-RPC message per line.
pub struct StdioTransport {
    name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    process: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<PendingRequests>,
}

impl StdioTransport {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env,
            process: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            pending: Arc::new(PendingRequests::new()),
        }
    }

    async fn spawn_process(&self) -> Result<(ChildStdin, ChildStdout), TransportError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("failed to capture stdout".into()))?;

        *self.process.lock().await = Some(child);
        Ok((stdin, stdout))
    }

    async fn read_responses(stdout: ChildStdout, pending: Arc<PendingRequests>, name: String) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        pending.dispatch(line).await;
                    }
                }
                Ok(None) => {
                    debug!(provider = %name, "Tool provider closed stdout");
                    break;
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Error reading from tool provider");
                    break;
                }
            }
        }
        pending.fail_all(TransportError::ConnectionClosed).await;
    }

    async fn write_requests(
        mut message_rx: mpsc::Receiver<TransportMessage>,
        mut stdin: ChildStdin,
        pending: Arc<PendingRequests>,
    ) {
        while let Some(message) = message_rx.recv().await {
            if let (Some(id), Some(tx)) = (message.id, message.response_tx) {
                pending.insert(id, tx).await;
            }

            let mut line = message.payload.into_bytes();
            line.push(b'\n');
            if stdin.write_all(&line).await.is_err() {
                pending.fail_all(TransportError::SendFailed).await;
                break;
            }
            if stdin.flush().await.is_err() {
                pending.fail_all(TransportError::ConnectionClosed).await;
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<TransportHandle, TransportError> {
        let (stdin, stdout) = self.spawn_process().await?;
        let (message_tx, message_rx) = mpsc::channel(32);

        let reader = tokio::spawn(Self::read_responses(
            stdout,
            self.pending.clone(),
            self.name.clone(),
        ));
        let writer = tokio::spawn(Self::write_requests(
            message_rx,
            stdin,
            self.pending.clone(),
        ));
        self.tasks.lock().await.extend([reader, writer]);

        debug!(provider = %self.name, command = %self.command, "Spawned tool provider process");
        Ok(TransportHandle::new(message_tx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        let child = self.process.lock().await.take();
        self.pending.fail_all(TransportError::ConnectionClosed).await;

        if let Some(mut child) = child {
            child
                .kill()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            debug!(provider = %self.name, "Terminated tool provider process");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let transport = StdioTransport::new(
            "ghost",
            "/definitely/not/a/real/binary",
            vec![],
            BTreeMap::new(),
        );
        let err = transport.start().await.err().unwrap();
        assert!(matches!(err, TransportError::Spawn(_)));
    }

    #[tokio::test]
    async fn close_before_start_is_noop() {
        let transport = StdioTransport::new("idle", "true", vec![], BTreeMap::new());
        assert!(transport.close().await.is_ok());
        assert!(transport.close().await.is_ok());
    }
}
