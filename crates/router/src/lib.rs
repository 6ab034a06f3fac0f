//! Function-Call Router: drives a multi-turn conversation with a chat
//! backend, executing any tool calls the model requests and feeding the
//! results back until the model stops calling tools or an iteration budget
//! is exhausted. Mirrors `function_router.py::FunctionRouter.handle_completion`.

pub mod backend;
pub mod error;

pub use {
    backend::ChatBackend,
    error::{Context, Error, Result},
};

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use fluidmcp_metrics::{counter, tools as tools_metrics};

use fluidmcp_tools::{ToolCall, ToolExecutor, ToolRegistry};

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_iterations: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

pub struct FunctionRouter {
    registry: ToolRegistry,
    executor: ToolExecutor,
    model_id: String,
    config: RouterConfig,
}

impl FunctionRouter {
    #[must_use]
    pub fn new(registry: ToolRegistry, executor: ToolExecutor, model_id: impl Into<String>) -> Self {
        Self {
            registry,
            executor,
            model_id: model_id.into(),
            config: RouterConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs the completion, executing tool calls in a loop until the model
    /// stops requesting them, `tool_choice` is `"none"`, or the iteration
    /// budget is exhausted. Returns the final completion response verbatim.
    /// `cancel` is forwarded to every tool call this turn makes; firing it
    /// mid-turn reaches the MCP child instead of leaving it running after
    /// the caller has given up.
    pub async fn handle_completion(
        &self,
        messages: Vec<Value>,
        backend: &dyn ChatBackend,
        tools: Option<Vec<Value>>,
        tool_choice: &str,
        extra_params: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let tools = match tools {
            Some(tools) => Some(tools),
            None if tool_choice != "none" => {
                let schemas = self.registry.list_tool_schemas().await;
                (!schemas.is_empty()).then_some(schemas)
            }
            None => None,
        };

        let Some(tools) = tools.filter(|t| !t.is_empty()) else {
            debug!("no tools available or tool_choice=none, doing normal completion");
            return self.call_backend(backend, &messages, None, tool_choice, &extra_params).await;
        };
        if tool_choice == "none" {
            debug!("tool_choice=none, doing normal completion");
            return self.call_backend(backend, &messages, None, tool_choice, &extra_params).await;
        }

        let mut current_messages = messages;
        let mut iteration = 0u32;
        let mut response: Option<Value> = None;
        let mut tool_choice = tool_choice.to_string();

        while iteration < self.config.max_iterations {
            iteration += 1;
            debug!(iteration, max = self.config.max_iterations, "function calling iteration");

            let resp = self
                .call_backend(backend, &current_messages, Some(&tools), &tool_choice, &extra_params)
                .await?;

            let tool_calls = extract_tool_calls(&resp);
            if tool_calls.is_empty() {
                info!("no tool calls in response, returning final answer");
                return Ok(resp);
            }

            // SECURITY: once we've asked the model for a tool_choice="none"
            // follow-up, a model that still returns tool_calls must not have
            // them executed — return the response untouched instead.
            if tool_choice == "none" {
                warn!(
                    count = tool_calls.len(),
                    "model returned tool calls despite tool_choice=none, refusing to execute"
                );
                return Ok(resp);
            }

            info!(count = tool_calls.len(), "model requested tool calls");

            let assistant_content = resp
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .cloned()
                .unwrap_or(Value::Null);
            current_messages.push(json!({
                "role": "assistant",
                "content": assistant_content,
                "tool_calls": tool_calls,
            }));

            let calls: Vec<ToolCall> = tool_calls
                .iter()
                .filter_map(value_to_tool_call)
                .collect();
            #[cfg(feature = "metrics")]
            counter!(tools_metrics::ROUTER_ITERATIONS_TOTAL).increment(1);

            let results = self.executor.execute_tool_calls(&calls, iteration - 1, cancel).await;
            for result in results {
                current_messages.push(json!({
                    "role": result.role,
                    "tool_call_id": result.tool_call_id,
                    "name": result.name,
                    "content": result.content,
                }));
            }

            debug!("added tool results, continuing to next iteration");

            // Forces the next turn to answer from the tool results rather
            // than calling tools again; line above still enforces this if
            // the model disobeys.
            tool_choice = "none".to_string();
            response = Some(resp);
        }

        match response {
            None => {
                warn!("max_iterations=0, returning response without any tool calling iterations");
                self.call_backend(backend, &current_messages, None, "auto", &extra_params).await
            }
            Some(resp) => {
                warn!(max_iterations = self.config.max_iterations, "max iterations reached, returning last response");
                Ok(resp)
            }
        }
    }

    async fn call_backend(
        &self,
        backend: &dyn ChatBackend,
        messages: &[Value],
        tools: Option<&[Value]>,
        tool_choice: &str,
        extra_params: &Map<String, Value>,
    ) -> Result<Value> {
        let mut request = extra_params.clone();
        request.insert("model".into(), json!(self.model_id));
        request.insert("messages".into(), json!(messages));
        if let Some(tools) = tools {
            request.insert("tools".into(), json!(tools));
            request.insert("tool_choice".into(), json!(tool_choice));
        }
        backend.complete(Value::Object(request)).await
    }
}

fn extract_tool_calls(response: &Value) -> Vec<Value> {
    response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("tool_calls"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn value_to_tool_call(call: &Value) -> Option<ToolCall> {
    let id = call.get("id")?.as_str()?.to_string();
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = function
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}")
        .to_string();
    Some(ToolCall { id, name, arguments })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;

    struct ScriptedBackend {
        responses: Mutex<Vec<Value>>,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _request: Value) -> Result<Value> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.remove(0))
        }
    }

    fn final_answer() -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": "done" } }] })
    }

    fn tool_call_response() -> Value {
        json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "echo", "arguments": "{\"x\":1}" }
                    }]
                }
            }]
        })
    }

    async fn registry_with_echo() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register(
                "echo",
                "echoes",
                json!({ "type": "object", "properties": {}, "required": [] }),
                Arc::new(|args, _cancel| Box::pin(async move { Ok(args) })),
            )
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn no_tools_does_plain_completion() {
        let registry = ToolRegistry::new();
        let executor = ToolExecutor::new(registry.clone());
        let router = FunctionRouter::new(registry, executor, "test-model");
        let backend = ScriptedBackend {
            responses: Mutex::new(vec![final_answer()]),
            calls: Arc::new(Mutex::new(0)),
        };

        let result = router
            .handle_completion(vec![json!({"role": "user", "content": "hi"})], &backend, None, "auto", Map::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["choices"][0]["message"]["content"], "done");
    }

    #[tokio::test]
    async fn tool_calls_are_resolved_then_final_answer_returned() {
        let registry = registry_with_echo().await;
        let executor = ToolExecutor::new(registry.clone());
        let router = FunctionRouter::new(registry, executor, "test-model");
        let calls = Arc::new(Mutex::new(0));
        let backend = ScriptedBackend {
            responses: Mutex::new(vec![tool_call_response(), final_answer()]),
            calls: Arc::clone(&calls),
        };

        let result = router
            .handle_completion(vec![json!({"role": "user", "content": "hi"})], &backend, None, "auto", Map::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["choices"][0]["message"]["content"], "done");
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn tool_choice_none_skips_tool_calling_entirely() {
        let registry = registry_with_echo().await;
        let executor = ToolExecutor::new(registry.clone());
        let router = FunctionRouter::new(registry, executor, "test-model");
        let backend = ScriptedBackend {
            responses: Mutex::new(vec![final_answer()]),
            calls: Arc::new(Mutex::new(0)),
        };

        let result = router
            .handle_completion(vec![json!({"role": "user", "content": "hi"})], &backend, None, "none", Map::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["choices"][0]["message"]["content"], "done");
    }

    #[tokio::test]
    async fn model_defying_tool_choice_none_is_not_executed() {
        let registry = registry_with_echo().await;
        let executor = ToolExecutor::new(registry.clone());
        let router = FunctionRouter::new(registry, executor, "test-model")
            .with_config(RouterConfig { max_iterations: 3 });
        // First turn has tools (auto); model immediately calls a tool, then on
        // the forced tool_choice=none follow-up it defies us and calls again.
        let backend = ScriptedBackend {
            responses: Mutex::new(vec![tool_call_response(), tool_call_response()]),
            calls: Arc::new(Mutex::new(0)),
        };

        let result = router
            .handle_completion(vec![json!({"role": "user", "content": "hi"})], &backend, None, "auto", Map::new(), &CancellationToken::new())
            .await
            .unwrap();
        // Returned verbatim without a third backend call resolving the tool.
        assert!(result["choices"][0]["message"]["tool_calls"].is_array());
    }

    #[tokio::test]
    async fn max_iterations_exhausted_returns_last_response() {
        let registry = registry_with_echo().await;
        let executor = ToolExecutor::new(registry.clone());
        let router = FunctionRouter::new(registry, executor, "test-model")
            .with_config(RouterConfig { max_iterations: 1 });
        let backend = ScriptedBackend {
            responses: Mutex::new(vec![tool_call_response()]),
            calls: Arc::new(Mutex::new(0)),
        };

        let result = router
            .handle_completion(vec![json!({"role": "user", "content": "hi"})], &backend, None, "auto", Map::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result["choices"][0]["message"]["tool_calls"].is_array());
    }
}
