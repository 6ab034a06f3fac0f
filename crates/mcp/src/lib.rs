//! MCP (Model Context Protocol) client support for fluidmcp.
//!
//! This crate provides the stdio JSON-RPC transport and the per-server client
//! that performs the handshake and exposes `tools/list` / `tools/call`. Server
//! lifecycle (spawn protocol, restart policy, the process table) lives in
//! `fluidmcp-manager`, which depends on this crate's traits.

pub mod client;
pub mod error;
pub mod traits;
pub mod transport;
pub mod types;

pub use {
    client::{McpClient, McpClientState},
    error::{Context, Error, Result},
    traits::{McpClientTrait, McpTransport},
    types::{McpToolDef, PROTOCOL_VERSION},
};
