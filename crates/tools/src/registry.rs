//! Tool Registry: a coarse-locked table of callable tools and their
//! JSON-Schema parameter definitions, mirroring `tool_registry.py`'s
//! `ToolRegistry` (register/unregister/lookup/list/clear, schema validated
//! at registration time rather than at call time).

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Outcome of a single tool invocation, before it is wrapped into a
/// role="tool" chat message by the executor.
pub type ToolOutcome = std::result::Result<Value, String>;

/// A tool's callable body. Boxed so the registry can hold handlers of
/// differing captured state behind one concrete type. Handlers that proxy
/// to an MCP server take the `CancellationToken` and pass it straight
/// through to `McpClientTrait::call_tool`, so a caller hanging up mid-call
/// reaches the child instead of just abandoning the future.
pub type ToolHandler = Arc<
    dyn Fn(Value, CancellationToken) -> Pin<Box<dyn Future<Output = ToolOutcome> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct RegisteredTool {
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

/// Validates a minimal JSON-Schema shape: must be an object schema, whose
/// `required` entries (if any) are all present in `properties`. This is the
/// same shallow check `tool_registry.py::_validate_schema` performs — it
/// does not attempt full JSON-Schema validation, only enough structure to
/// catch a malformed registration before it reaches a caller.
fn validate_schema(name: &str, schema: &Value) -> Result<()> {
    let object = schema.as_object().ok_or_else(|| Error::InvalidSchema {
        name: name.to_string(),
        reason: "schema must be a JSON object".into(),
    })?;

    if object.get("type").and_then(Value::as_str) != Some("object") {
        return Err(Error::InvalidSchema {
            name: name.to_string(),
            reason: "schema \"type\" must be \"object\"".into(),
        });
    }

    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::InvalidSchema {
            name: name.to_string(),
            reason: "schema must have an object \"properties\"".into(),
        })?;

    if let Some(required) = object.get("required") {
        let required = required.as_array().ok_or_else(|| Error::InvalidSchema {
            name: name.to_string(),
            reason: "schema \"required\" must be an array".into(),
        })?;
        for entry in required {
            let key = entry.as_str().ok_or_else(|| Error::InvalidSchema {
                name: name.to_string(),
                reason: "schema \"required\" entries must be strings".into(),
            })?;
            if !properties.contains_key(key) {
                return Err(Error::InvalidSchema {
                    name: name.to_string(),
                    reason: format!("required field \"{key}\" is not in properties"),
                });
            }
        }
    }

    Ok(())
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<Mutex<HashMap<String, RegisteredTool>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: ToolHandler,
    ) -> Result<()> {
        let name = name.into();
        validate_schema(&name, &input_schema)?;

        let mut tools = self.tools.lock().await;
        if tools.contains_key(&name) {
            return Err(Error::Duplicate(name));
        }
        tools.insert(
            name,
            RegisteredTool {
                description: description.into(),
                input_schema,
                handler,
            },
        );
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut tools = self.tools.lock().await;
        tools
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    pub async fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.lock().await.get(name).cloned()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.tools.lock().await.contains_key(name)
    }

    pub async fn list_tool_names(&self) -> Vec<String> {
        self.tools.lock().await.keys().cloned().collect()
    }

    /// OpenAI-style tool definitions (`{type: "function", function: {...}}`)
    /// for every registered tool, suitable for inclusion in a chat
    /// completion request's `tools` field.
    pub async fn list_tool_schemas(&self) -> Vec<Value> {
        self.tools
            .lock()
            .await
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.tools.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.tools.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.lock().await.is_empty()
    }
}
