//! MCP client: manages the protocol handshake and tool interactions with a single MCP server.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use fluidmcp_metrics::{counter, histogram, labels, mcp as mcp_metrics};

use crate::{
    error::{Error, Result},
    traits::{McpClientTrait, McpTransport},
    transport::StdioTransport,
    types::{
        CancelledParams, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
        McpToolDef, PROTOCOL_VERSION, ToolsCallParams, ToolsCallResult, ToolsListResult,
    },
};

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport spawned, not yet initialized.
    Connected,
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Server process exited or was shut down.
    Closed,
}

impl std::fmt::Display for McpClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An MCP client connected to a single server via stdio.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    state: McpClientState,
    server_info: Option<InitializeResult>,
    tools: Vec<McpToolDef>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.server_name)
            .field("state", &self.state)
            .field("server_info", &self.server_info)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Spawn the server process and perform the MCP handshake (initialize + initialized),
    /// bounded by `readiness_timeout`.
    pub async fn connect(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        readiness_timeout: Duration,
    ) -> Result<Self> {
        Self::connect_with_stderr_log(server_name, command, args, env, readiness_timeout, None).await
    }

    /// Same as [`Self::connect`], additionally mirroring the child's stderr
    /// into `stderr_log` when one is supplied.
    pub async fn connect_with_stderr_log(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        readiness_timeout: Duration,
        stderr_log: Option<std::fs::File>,
    ) -> Result<Self> {
        info!(server = %server_name, command = %command, args = ?args, "connecting to MCP server");
        let transport = StdioTransport::spawn_with_stderr_log(
            command,
            args,
            env,
            crate::transport::DEFAULT_REQUEST_TIMEOUT,
            stderr_log,
        )
        .await?;

        let mut client = Self {
            server_name: server_name.into(),
            transport,
            state: McpClientState::Connected,
            server_info: None,
            tools: Vec::new(),
        };

        match tokio::time::timeout(readiness_timeout, client.initialize()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(server = %server_name, error = %e, "MCP initialize handshake failed");
                return Err(e);
            },
            Err(_) => {
                warn!(server = %server_name, "MCP initialize handshake timed out");
                client.transport.kill().await;
                return Err(Error::Timeout {
                    method: "initialize".into(),
                    secs: readiness_timeout.as_secs(),
                });
            },
        }

        #[cfg(feature = "metrics")]
        {
            counter!(mcp_metrics::SERVER_CONNECTIONS_TOTAL, labels::SERVER => server_name.to_string())
                .increment(1);
        }

        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "fluidmcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;

        let result: InitializeResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| Error::message("MCP initialize returned no result"))?,
        )?;

        info!(
            server = %self.server_name,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP server initialized"
        );

        self.server_info = Some(result);

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.state = McpClientState::Ready;

        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != McpClientState::Ready {
            return Err(Error::NotReady {
                server: self.server_name.clone(),
                state: self.state.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpClientTrait for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> McpClientState {
        self.state
    }

    fn tools(&self) -> &[McpToolDef] {
        &self.tools
    }

    async fn list_tools(&mut self) -> Result<&[McpToolDef]> {
        self.ensure_ready()?;

        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| Error::message("tools/list returned no result"))?,
        )?;

        debug!(
            server = %self.server_name,
            count = result.tools.len(),
            "fetched MCP tools"
        );

        self.tools = result.tools;
        Ok(&self.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolsCallResult> {
        self.ensure_ready()?;

        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };

        let result = self
            .transport
            .request_cancellable("tools/call", Some(serde_json::to_value(&params)?), cancel)
            .await;

        match result {
            Ok(resp) => {
                let result: ToolsCallResult = serde_json::from_value(
                    resp.result
                        .ok_or_else(|| Error::message("tools/call returned no result"))?,
                )?;

                #[cfg(feature = "metrics")]
                {
                    let duration = start.elapsed().as_secs_f64();
                    counter!(
                        mcp_metrics::TOOL_CALLS_TOTAL,
                        labels::SERVER => self.server_name.clone(),
                        labels::TOOL => name.to_string()
                    )
                    .increment(1);
                    histogram!(
                        mcp_metrics::TOOL_CALL_DURATION_SECONDS,
                        labels::SERVER => self.server_name.clone(),
                        labels::TOOL => name.to_string()
                    )
                    .record(duration);
                }

                Ok(result)
            },
            Err(Error::Cancelled { id, .. }) => {
                warn!(server = %self.server_name, tool = %name, id, "tool call cancelled, notifying child");
                let _ = self
                    .cancel(serde_json::json!(id), Some("client disconnected".to_string()))
                    .await;

                #[cfg(feature = "metrics")]
                {
                    counter!(
                        mcp_metrics::TOOL_CALL_ERRORS_TOTAL,
                        labels::SERVER => self.server_name.clone(),
                        labels::TOOL => name.to_string()
                    )
                    .increment(1);
                }
                Err(Error::Cancelled { method: "tools/call".into(), id })
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                {
                    counter!(
                        mcp_metrics::TOOL_CALL_ERRORS_TOTAL,
                        labels::SERVER => self.server_name.clone(),
                        labels::TOOL => name.to_string()
                    )
                    .increment(1);
                }
                Err(e)
            },
        }
    }

    async fn cancel(&self, request_id: serde_json::Value, reason: Option<String>) -> Result<()> {
        let params = CancelledParams { request_id, reason };
        self.transport
            .notify("notifications/cancelled", Some(serde_json::to_value(&params)?))
            .await
    }

    async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    async fn pid(&self) -> Option<u32> {
        self.transport.pid().await
    }

    async fn shutdown(&mut self) {
        self.state = McpClientState::Closed;
        self.transport.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_state_debug() {
        assert_eq!(format!("{:?}", McpClientState::Connected), "Connected");
        assert_eq!(format!("{:?}", McpClientState::Ready), "Ready");
        assert_eq!(format!("{:?}", McpClientState::Closed), "Closed");
    }

    #[tokio::test]
    async fn test_connect_times_out_on_slow_handshake() {
        // `sleep` never speaks JSON-RPC, so the readiness timeout must fire
        // rather than block startup forever.
        let result = McpClient::connect(
            "slow",
            "sleep",
            &["5".into()],
            &HashMap::new(),
            Duration::from_millis(50),
        )
        .await;
        assert!(result.is_err());
    }
}
