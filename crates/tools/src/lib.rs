//! Tool Registry and Tool Executor: the function-calling primitives the
//! Function-Call Router dispatches through. Registration validates a tool's
//! JSON-Schema up front; execution enforces an allowlist, a call-depth
//! limit, and a per-tool timeout, and never lets a tool failure escape as a
//! Rust error — every outcome becomes a normalized `role: "tool"` message.

pub mod error;
pub mod executor;
pub mod registry;

pub use {
    error::{Context, Error, Result},
    executor::{ToolCall, ToolExecutor, ToolResultMessage, DEFAULT_MAX_CALL_DEPTH, DEFAULT_TIMEOUT_PER_TOOL},
    registry::{RegisteredTool, ToolHandler, ToolOutcome, ToolRegistry},
};
