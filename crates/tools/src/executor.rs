//! Tool Executor: runs a validated tool call against the registry with a
//! depth limit, an allowlist, and a per-tool timeout, normalizing every
//! failure mode into a chat "tool" message rather than raising — mirrors
//! `tool_executor.py::ToolExecutor`, whose `_success_response`/
//! `_error_response` both return the same message shape so callers never
//! need to distinguish success from failure structurally.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[cfg(feature = "metrics")]
use fluidmcp_metrics::{counter, gauge, histogram, tools as tools_metrics};

use crate::registry::ToolRegistry;

pub const DEFAULT_TIMEOUT_PER_TOOL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 3;

/// A single function call requested by a model, in OpenAI's shape:
/// arguments arrive as a JSON-encoded string, not a parsed value.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A chat message reporting the outcome of one tool call. `content` carries
/// either the tool's JSON result or a human-readable error string — both
/// serialized as text, matching the `role: "tool"` message shape consumed
/// by chat completion APIs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub role: &'static str,
    pub name: String,
    pub content: String,
}

impl ToolResultMessage {
    fn success(tool_call_id: String, name: String, value: &Value) -> Self {
        Self {
            tool_call_id,
            role: "tool",
            name,
            content: value.to_string(),
        }
    }

    fn error(tool_call_id: String, name: String, message: impl Into<String>) -> Self {
        Self {
            tool_call_id,
            role: "tool",
            name,
            content: serde_json::json!({ "error": message.into() }).to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    allowed_tools: Vec<String>,
    timeout_per_tool: Duration,
    max_call_depth: u32,
}

impl ToolExecutor {
    #[must_use]
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            allowed_tools: Vec::new(),
            timeout_per_tool: DEFAULT_TIMEOUT_PER_TOOL,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    #[must_use]
    pub fn with_allowed_tools(mut self, allowed_tools: Vec<String>) -> Self {
        self.allowed_tools = allowed_tools;
        self
    }

    #[must_use]
    pub fn with_timeout_per_tool(mut self, timeout: Duration) -> Self {
        self.timeout_per_tool = timeout;
        self
    }

    #[must_use]
    pub fn with_max_call_depth(mut self, max_call_depth: u32) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == name)
    }

    /// Executes one tool call. Never returns an `Err`: every failure mode
    /// (depth exceeded, not allowed, not registered, bad arguments, timeout,
    /// handler failure) is normalized into an error-shaped `ToolResultMessage`.
    /// `cancel` is handed to the tool's handler; an MCP-backed tool passes it
    /// straight through to `call_tool` so a caller hanging up reaches the
    /// child instead of leaving the request running.
    pub async fn execute_tool_call(
        &self,
        call: &ToolCall,
        depth: u32,
        cancel: &CancellationToken,
    ) -> ToolResultMessage {
        #[cfg(feature = "metrics")]
        gauge!(tools_metrics::EXECUTIONS_IN_FLIGHT).increment(1.0);

        let result = self.execute_inner(call, depth, cancel).await;

        #[cfg(feature = "metrics")]
        {
            gauge!(tools_metrics::EXECUTIONS_IN_FLIGHT).decrement(1.0);
            counter!(tools_metrics::EXECUTIONS_TOTAL).increment(1);
            if result.content.contains("\"error\"") {
                counter!(tools_metrics::EXECUTION_ERRORS_TOTAL).increment(1);
            }
        }

        result
    }

    async fn execute_inner(
        &self,
        call: &ToolCall,
        depth: u32,
        cancel: &CancellationToken,
    ) -> ToolResultMessage {
        if depth >= self.max_call_depth {
            warn!(tool = %call.name, depth, "max tool call depth exceeded");
            return ToolResultMessage::error(
                call.id.clone(),
                call.name.clone(),
                format!("max tool call depth ({}) exceeded", self.max_call_depth),
            );
        }

        if !self.is_allowed(&call.name) {
            return ToolResultMessage::error(
                call.id.clone(),
                call.name.clone(),
                format!("tool '{}' is not allowed in this context", call.name),
            );
        }

        let Some(tool) = self.registry.get(&call.name).await else {
            return ToolResultMessage::error(
                call.id.clone(),
                call.name.clone(),
                format!("tool '{}' is not registered", call.name),
            );
        };

        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                return ToolResultMessage::error(
                    call.id.clone(),
                    call.name.clone(),
                    format!("invalid arguments: {e}"),
                );
            }
        };

        #[cfg(feature = "metrics")]
        let _timer = std::time::Instant::now();

        let outcome = tokio::time::timeout(
            self.timeout_per_tool,
            (tool.handler)(arguments, cancel.clone()),
        )
        .await;

        #[cfg(feature = "metrics")]
        histogram!(tools_metrics::EXECUTION_DURATION_SECONDS).record(_timer.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(value)) => ToolResultMessage::success(call.id.clone(), call.name.clone(), &value),
            Ok(Err(message)) => ToolResultMessage::error(call.id.clone(), call.name.clone(), message),
            Err(_) => ToolResultMessage::error(
                call.id.clone(),
                call.name.clone(),
                format!(
                    "tool '{}' timed out after {:?}",
                    call.name, self.timeout_per_tool
                ),
            ),
        }
    }

    /// Executes every call concurrently. Order of results matches `calls`.
    pub async fn execute_tool_calls(
        &self,
        calls: &[ToolCall],
        depth: u32,
        cancel: &CancellationToken,
    ) -> Vec<ToolResultMessage> {
        futures::future::join_all(
            calls
                .iter()
                .map(|call| self.execute_tool_call(call, depth, cancel)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::ToolHandler;

    fn make_registry() -> ToolRegistry {
        ToolRegistry::new()
    }

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "x": { "type": "number" } },
            "required": [],
        })
    }

    async fn register_double(registry: &ToolRegistry) {
        let handler: ToolHandler = Arc::new(|args, _cancel| {
            Box::pin(async move {
                let x = args.get("x").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(serde_json::json!({ "result": x * 2.0 }))
            })
        });
        registry
            .register("double", "doubles a number", schema(), handler)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn successful_call_returns_tool_message() {
        let registry = make_registry();
        register_double(&registry).await;
        let executor = ToolExecutor::new(registry);

        let call = ToolCall {
            id: "call_1".into(),
            name: "double".into(),
            arguments: r#"{"x": 21}"#.into(),
        };
        let msg = executor.execute_tool_call(&call, 0, &CancellationToken::new()).await;
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id, "call_1");
        assert!(msg.content.contains("42"));
    }

    #[tokio::test]
    async fn unregistered_tool_normalizes_to_error_message() {
        let executor = ToolExecutor::new(make_registry());
        let call = ToolCall {
            id: "call_1".into(),
            name: "missing".into(),
            arguments: "{}".into(),
        };
        let msg = executor.execute_tool_call(&call, 0, &CancellationToken::new()).await;
        assert!(msg.content.contains("not registered"));
    }

    #[tokio::test]
    async fn depth_limit_rejects_without_executing() {
        let registry = make_registry();
        register_double(&registry).await;
        let executor = ToolExecutor::new(registry).with_max_call_depth(1);
        let call = ToolCall {
            id: "call_1".into(),
            name: "double".into(),
            arguments: r#"{"x": 1}"#.into(),
        };
        let msg = executor.execute_tool_call(&call, 1, &CancellationToken::new()).await;
        assert!(msg.content.contains("depth"));
    }

    #[tokio::test]
    async fn disallowed_tool_is_rejected() {
        let registry = make_registry();
        register_double(&registry).await;
        let executor = ToolExecutor::new(registry).with_allowed_tools(vec!["other".into()]);
        let call = ToolCall {
            id: "call_1".into(),
            name: "double".into(),
            arguments: "{}".into(),
        };
        let msg = executor.execute_tool_call(&call, 0, &CancellationToken::new()).await;
        assert!(msg.content.contains("not allowed"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_reported_without_panicking() {
        let registry = make_registry();
        register_double(&registry).await;
        let executor = ToolExecutor::new(registry);
        let call = ToolCall {
            id: "call_1".into(),
            name: "double".into(),
            arguments: "not json".into(),
        };
        let msg = executor.execute_tool_call(&call, 0, &CancellationToken::new()).await;
        assert!(msg.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let registry = make_registry();
        let handler: ToolHandler = Arc::new(|_args, _cancel| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(serde_json::json!({}))
            })
        });
        registry
            .register("slow", "sleeps", schema(), handler)
            .await
            .unwrap();
        let executor = ToolExecutor::new(registry).with_timeout_per_tool(Duration::from_millis(10));
        let call = ToolCall {
            id: "call_1".into(),
            name: "slow".into(),
            arguments: "{}".into(),
        };
        let msg = executor.execute_tool_call(&call, 0, &CancellationToken::new()).await;
        assert!(msg.content.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_token_is_forwarded_to_the_handler() {
        let registry = make_registry();
        let handler: ToolHandler = Arc::new(|_args, cancel| {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(serde_json::json!({ "cancelled": true }))
            })
        });
        registry
            .register("waits_for_cancel", "waits for cancellation", schema(), handler)
            .await
            .unwrap();
        let executor = ToolExecutor::new(registry);
        let call = ToolCall {
            id: "call_1".into(),
            name: "waits_for_cancel".into(),
            arguments: "{}".into(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let msg = executor.execute_tool_call(&call, 0, &cancel).await;
        assert!(msg.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn concurrent_calls_all_complete() {
        let registry = make_registry();
        register_double(&registry).await;
        let executor = ToolExecutor::new(registry);
        let calls = vec![
            ToolCall { id: "1".into(), name: "double".into(), arguments: r#"{"x":1}"#.into() },
            ToolCall { id: "2".into(), name: "double".into(), arguments: r#"{"x":2}"#.into() },
        ];
        let results = executor.execute_tool_calls(&calls, 0, &CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
    }
}
