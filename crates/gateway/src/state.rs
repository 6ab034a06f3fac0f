//! Shared application state handed to every axum handler via `State<AppState>`.
//! Grounded on the teacher's `state.rs`/`server.rs` convention of a cheaply
//! `Clone`-able struct holding `Arc`s to the long-lived subsystems, so axum
//! can fan it out to every handler without a lock around the whole thing.

use std::sync::Arc;

use fluidmcp_manager::ServerManager;
use fluidmcp_mcp::McpClientTrait;
use fluidmcp_persistence::Repository;
use fluidmcp_tools::{ToolExecutor, ToolRegistry};

/// Process-wide auth gate: `spec.md` §4.7's single bearer-token model.
/// `None` means auth is disabled (`FMCP_SECURE_MODE` unset or false).
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub bearer_token: Option<Arc<str>>,
}

impl AuthConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(token: impl Into<Arc<str>>) -> Self {
        Self {
            bearer_token: Some(token.into()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.bearer_token.is_some()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ServerManager>,
    pub repo: Arc<dyn Repository>,
    pub auth: AuthConfig,
    #[cfg(feature = "metrics")]
    pub metrics: Option<fluidmcp_metrics::MetricsHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(manager: Arc<ServerManager>, repo: Arc<dyn Repository>, auth: AuthConfig) -> Self {
        Self {
            manager,
            repo,
            auth,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, metrics: fluidmcp_metrics::MetricsHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds a fresh Tool Registry populated with every tool currently
    /// cached across all registered servers, namespaced `{server_id}__{tool}`
    /// to avoid collisions, each handler dispatching through the Server
    /// Manager's proxy. Rebuilt per request: `spec.md` §9's decision that
    /// cached tools are trusted across restarts but never proactively
    /// invalidated means there is no long-lived registry to keep in sync.
    pub async fn build_tool_registry(&self) -> fluidmcp_common::Result<ToolRegistry> {
        let registry = ToolRegistry::new();
        let servers = self
            .repo
            .list_servers(true)
            .await
            .map_err(|e| fluidmcp_common::Error::persistence_degraded(e.to_string()))?;

        for server in servers {
            for tool in &server.tools {
                let name = format!("{}__{}", server.id, tool.name);
                let manager = Arc::clone(&self.manager);
                let server_id = server.id.clone();
                let tool_name = tool.name.clone();
                let handler: fluidmcp_tools::ToolHandler = Arc::new(move |args, cancel| {
                    let manager = Arc::clone(&manager);
                    let server_id = server_id.clone();
                    let tool_name = tool_name.clone();
                    Box::pin(async move {
                        let proxy = manager
                            .acquire_proxy(&server_id, true, fluidmcp_manager::DEFAULT_INIT_TIMEOUT)
                            .await
                            .map_err(|e| e.to_string())?;
                        let result = proxy
                            .read()
                            .await
                            .call_tool(&tool_name, args, &cancel)
                            .await
                            .map_err(|e| e.to_string())?;
                        Ok(crate::servers::tool_result_to_value(&result))
                    })
                });

                let schema = tool.input_schema.clone();
                let schema = normalize_tool_schema(schema);
                if registry
                    .register(name, tool.description.clone().unwrap_or_default(), schema, handler)
                    .await
                    .is_err()
                {
                    tracing::warn!(server = %server.id, tool = %tool.name, "skipping tool with invalid schema");
                }
            }
        }

        Ok(registry)
    }
}

/// `ToolRegistry::register` requires an object schema with a `properties`
/// map; some MCP servers report a bare `{"type":"object"}` with no
/// properties at all, which the Tool Registry's shallow validator rejects.
fn normalize_tool_schema(mut schema: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = schema.as_object_mut()
        && !obj.contains_key("properties")
    {
        obj.insert("properties".into(), serde_json::json!({}));
    }
    schema
}

pub fn tool_executor(registry: ToolRegistry) -> ToolExecutor {
    ToolExecutor::new(registry)
}
