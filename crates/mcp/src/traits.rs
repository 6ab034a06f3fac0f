//! Trait abstractions for the MCP transport and client layers.
//!
//! These traits let the server manager and router depend on an abstract
//! connection instead of the concrete stdio transport.

use {async_trait::async_trait, serde_json::Value, tokio_util::sync::CancellationToken};

use crate::{
    client::McpClientState,
    error::Result,
    types::{JsonRpcResponse, McpToolDef, ToolsCallResult},
};

/// Transport layer for MCP communication (JSON-RPC).
///
/// `StdioTransport` implements this over stdin/stdout of a child process.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Same as [`Self::request`], but racing the wait against `cancel`. When
    /// `cancel` fires first, the pending waiter is dropped and this returns
    /// `Error::Cancelled` carrying the request's id so the caller can notify
    /// the child.
    async fn request_cancellable(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the underlying connection/process is still alive.
    async fn is_alive(&self) -> bool;

    /// OS process id of the underlying child, if still known.
    async fn pid(&self) -> Option<u32>;

    /// Kill/close the underlying connection/process.
    async fn kill(&self);
}

/// Client-level abstraction for an MCP server connection.
#[async_trait]
pub trait McpClientTrait: Send + Sync {
    /// The display name of the connected server.
    fn server_name(&self) -> &str;

    /// Current connection state.
    fn state(&self) -> McpClientState;

    /// Cached tool definitions (call `list_tools` first to populate).
    fn tools(&self) -> &[McpToolDef];

    /// Fetch the list of tools from the server, caching the result.
    async fn list_tools(&mut self) -> Result<&[McpToolDef]>;

    /// Call a tool on the server. `cancel` is checked for the duration of
    /// the call; if it fires before the child responds, the in-flight
    /// request is notified as cancelled and this returns an error instead
    /// of hanging the caller's turn.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolsCallResult>;

    /// Notify the server that an in-flight tool call has been cancelled.
    async fn cancel(&self, request_id: Value, reason: Option<String>) -> Result<()>;

    /// Check if the server process/connection is still alive.
    async fn is_alive(&self) -> bool;

    /// OS process id of the underlying child, if still known.
    async fn pid(&self) -> Option<u32>;

    /// Shut down the server connection.
    async fn shutdown(&mut self);
}
