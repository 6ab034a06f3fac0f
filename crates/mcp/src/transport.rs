//! Stdio transport: spawn a child process and communicate via JSON-RPC over stdin/stdout.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, Command},
        sync::{Mutex, oneshot},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Error, Result},
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

/// Default ceiling on how long a single JSON-RPC request waits for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stdio-based transport for an MCP server process.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>,
    next_id: AtomicU64,
    request_timeout: Duration,
    /// Handle to the reader task so we can abort on drop.
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader loop.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>> {
        Self::spawn_with_timeout(command, args, env, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Spawn the server process with an explicit per-request timeout.
    pub async fn spawn_with_timeout(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        Self::spawn_with_stderr_log(command, args, env, request_timeout, None).await
    }

    /// Spawn the server process, mirroring its stderr into `stderr_log` (in
    /// addition to the tracing sink below) when one is supplied. The manager
    /// uses this to give each child its own rotated log file.
    pub async fn spawn_with_stderr_log(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
        stderr_log: Option<std::fs::File>,
    ) -> Result<Arc<Self>> {
        info!(
            command = %command,
            args = ?args,
            "spawning MCP server process"
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::external(format!("failed to spawn MCP server: {command}"), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::message("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::message("failed to capture stdout"))?;
        let stderr = child.stderr.take();

        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let transport = Arc::new(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(1),
            request_timeout,
            reader_handle: Mutex::new(None),
        });

        // Stderr is logged to the caller's tracing sink and, when a log file
        // was supplied, mirrored there as well.
        if let Some(stderr) = stderr {
            let mut stderr_log = stderr_log.map(tokio::fs::File::from_std);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                warn!(stderr = %trimmed, "MCP server stderr");
                            }
                            if let Some(log) = stderr_log.as_mut() {
                                let _ = log.write_all(line.as_bytes()).await;
                            }
                        },
                        Err(_) => break,
                    }
                }
            });
        }

        let pending_clone = Arc::clone(&pending);
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("MCP server stdout closed");
                        break;
                    },
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!(raw = %trimmed, "MCP server -> client");

                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                let key = resp.id.to_string();
                                let mut map = pending_clone.lock().await;
                                if let Some(tx) = map.remove(&key) {
                                    let _ = tx.send(resp);
                                } else {
                                    warn!(id = %key, "received response for unknown request id");
                                }
                            },
                            Err(e) => {
                                debug!(error = %e, line = %trimmed, "MCP server sent non-response line");
                            },
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "error reading from MCP server stdout");
                        break;
                    },
                }
            }
        });

        *transport.reader_handle.lock().await = Some(handle);
        Ok(transport)
    }
}

impl StdioTransport {
    /// Writes the request and registers its waiter, returning the numeric
    /// id the caller needs to later cancel it.
    async fn send_request(&self, id: u64, method: &str, params: Option<serde_json::Value>) -> Result<(String, oneshot::Receiver<JsonRpcResponse>)> {
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = req.id.to_string();

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id_key.clone(), tx);
        }

        let mut payload = serde_json::to_string(&req)?;
        payload.push('\n');

        debug!(method = %method, id = %id, "client -> MCP server");

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(payload.as_bytes()).await?;
            stdin.flush().await?;
        }

        Ok((id_key, rx))
    }
}

#[async_trait::async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (id_key, rx) = self.send_request(id, method, params).await?;

        let resp = tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| {
                self.pending.try_lock().ok().map(|mut m| m.remove(&id_key));
                Error::Timeout {
                    method: method.to_string(),
                    secs: self.request_timeout.as_secs(),
                }
            })?
            .map_err(|_| {
                Error::message(format!(
                    "MCP reader task dropped while waiting for '{method}' response"
                ))
            })?;

        if let Some(ref err) = resp.error {
            return Err(Error::Protocol {
                method: method.to_string(),
                code: err.code,
                message: err.message.clone(),
            });
        }

        Ok(resp)
    }

    async fn request_cancellable(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (id_key, rx) = self.send_request(id, method, params).await?;

        tokio::select! {
            resp = tokio::time::timeout(self.request_timeout, rx) => {
                let resp = resp
                    .map_err(|_| {
                        self.pending.try_lock().ok().map(|mut m| m.remove(&id_key));
                        Error::Timeout {
                            method: method.to_string(),
                            secs: self.request_timeout.as_secs(),
                        }
                    })?
                    .map_err(|_| {
                        Error::message(format!(
                            "MCP reader task dropped while waiting for '{method}' response"
                        ))
                    })?;

                if let Some(ref err) = resp.error {
                    return Err(Error::Protocol {
                        method: method.to_string(),
                        code: err.code,
                        message: err.message.clone(),
                    });
                }

                Ok(resp)
            }
            () = cancel.cancelled() => {
                self.pending.lock().await.remove(&id_key);
                Err(Error::Cancelled { method: method.to_string(), id })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };

        let mut payload = serde_json::to_string(&notif)?;
        payload.push('\n');

        trace!(method = %method, "client -> MCP server (notification)");

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }

    async fn kill(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_kill() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new())
            .await
            .unwrap();
        assert!(transport.is_alive().await);
        transport.kill().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_alive().await);
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result =
            StdioTransport::spawn("nonexistent_command_xyz_42", &[], &HashMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_request_times_out() {
        // `cat` never answers with a JSON-RPC response, so any request should
        // hit the per-call timeout rather than hang forever.
        let transport =
            StdioTransport::spawn_with_timeout("cat", &[], &HashMap::new(), Duration::from_millis(50))
                .await
                .unwrap();
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        transport.kill().await;
    }
}
