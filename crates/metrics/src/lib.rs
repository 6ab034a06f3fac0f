//! Thin observability shim: metric name constants plus an optional Prometheus
//! render handle, so emitting a counter/gauge/histogram never depends on
//! whether a scrape endpoint is actually wired up.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fluidmcp_metrics::{counter, mcp};
//!
//! counter!(mcp::TOOL_CALLS_TOTAL, "server" => "fs").increment(1);
//! ```
//!
//! # Features
//!
//! - `prometheus`: export via a render-able handle for a `/metrics` endpoint.

pub mod definitions;
pub mod error;
pub mod recorder;

pub use definitions::*;
pub use error::{Error, Result};
pub use metrics::{counter, gauge, histogram};
pub use recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics};
