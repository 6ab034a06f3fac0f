//! `/api/servers*`: Server Manager CRUD, lifecycle, logs, and the raw
//! tool-call path. Grounded on `spec.md` §6's endpoint table and the
//! teacher's `tools_routes.rs`/`server.rs` handler shape
//! (`State<AppState>`, `Json<...>`, `StatusCode`).

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use fluidmcp_mcp::{
    McpClientTrait,
    types::{ToolContent, ToolsCallResult},
};
use fluidmcp_persistence::types::{GithubProvenance, LogStream, RestartPolicyKind, ServerConfig, ServerConfigWire};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ApiResult,
    github_import::GithubImporter,
    state::AppState,
};

fn wire_to_config(wire: ServerConfigWire, existing_id: Option<&str>) -> ApiResult<ServerConfig> {
    let id = existing_id
        .map(ToString::to_string)
        .or(wire.id)
        .ok_or_else(|| fluidmcp_common::Error::validation("missing required field \"id\""))?;

    if !ServerConfig::is_valid_id(&id) {
        return Err(fluidmcp_common::Error::validation(format!("invalid server id '{id}'")).into());
    }

    let now = Utc::now();
    Ok(ServerConfig {
        id,
        name: wire.name,
        description: wire.description,
        enabled: wire.enabled,
        command: wire.command,
        args: wire.args,
        env: wire.env,
        working_dir: wire.working_dir,
        restart_policy: wire.restart_policy.unwrap_or(RestartPolicyKind::OnFailure),
        restart_window_sec: wire.restart_window_sec.unwrap_or(60),
        max_restarts: wire.max_restarts.unwrap_or(3),
        provenance: wire.provenance,
        created_by: wire.created_by,
        created_at: now,
        updated_at: now,
        tools: Vec::new(),
    })
}

pub async fn list_servers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let servers = state.manager.list().await?;
    Ok(Json(servers))
}

pub async fn add_server(
    State(state): State<AppState>,
    Json(wire): Json<ServerConfigWire>,
) -> ApiResult<impl IntoResponse> {
    let config = wire_to_config(wire, None)?;
    state.manager.add(config.clone()).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let servers = state.manager.list().await?;
    servers
        .into_iter()
        .find(|s| s.id == id)
        .map(Json)
        .ok_or_else(|| fluidmcp_common::Error::not_found(format!("server '{id}' not found")).into())
}

pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(wire): Json<ServerConfigWire>,
) -> ApiResult<impl IntoResponse> {
    state
        .manager
        .update(&id, |config| {
            config.name = wire.name.clone();
            config.description = wire.description.clone();
            config.enabled = wire.enabled;
            config.command = wire.command.clone();
            config.args = wire.args.clone();
            config.env = wire.env.clone();
            config.working_dir = wire.working_dir.clone();
            if let Some(policy) = wire.restart_policy {
                config.restart_policy = policy;
            }
            if let Some(window) = wire.restart_window_sec {
                config.restart_window_sec = window;
            }
            if let Some(max) = wire.max_restarts {
                config.max_restarts = max;
            }
        })
        .await?;

    let servers = state.manager.list().await?;
    let updated = servers
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| fluidmcp_common::Error::not_found(format!("server '{id}' not found")))?;
    Ok(Json(updated))
}

pub async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.start(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn stop_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .manager
        .stop(&id, fluidmcp_manager::DEFAULT_SHUTDOWN_TIMEOUT)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn server_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.manager.status(&id).await?;
    Ok(Json(json!({
        "state": report.state,
        "pid": report.pid,
        "uptime_sec": report.uptime_sec,
        "restart_count": report.restart_count,
        "last_error": report.last_error,
    })))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_lines")]
    lines: usize,
}

fn default_log_lines() -> usize {
    100
}

pub async fn server_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let entries = state
        .repo
        .tail_logs(&id, query.lines)
        .await
        .map_err(|e| fluidmcp_common::Error::persistence_degraded(e.to_string()))?;
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct RunToolBody {
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Raw tool-call path (bypasses the Tool Registry/Function-Call Router
/// entirely): a child's JSON-RPC error becomes a 200 with a structured
/// `{error: true, ...}` body, but a timeout surfaces as a 504, per
/// `spec.md` §7.
pub async fn run_tool(
    State(state): State<AppState>,
    Path((id, tool_name)): Path<(String, String)>,
    Json(body): Json<RunToolBody>,
) -> ApiResult<impl IntoResponse> {
    let proxy = state
        .manager
        .acquire_proxy(&id, true, fluidmcp_manager::DEFAULT_INIT_TIMEOUT)
        .await?;

    let cancel = CancellationToken::new();
    let guard = proxy.read().await;
    let call = guard.call_tool(&tool_name, body.arguments, &cancel);
    tokio::pin!(call);

    let result = tokio::select! {
        res = &mut call => res.map_err(|e| fluidmcp_common::Error::child_error(e.to_string())),
        () = tokio::time::sleep(Duration::from_secs(30)) => {
            // Notifies the child so it can abandon the in-flight call instead
            // of running to completion after the caller has stopped waiting.
            cancel.cancel();
            call.await.ok();
            Err(fluidmcp_common::Error::timeout(format!("tool '{tool_name}' timed out")))
        }
    }?;

    Ok(Json(tool_result_to_value(&result)))
}

pub fn tool_result_to_value(result: &ToolsCallResult) -> serde_json::Value {
    let content: Vec<serde_json::Value> = result
        .content
        .iter()
        .map(|item| match item {
            ToolContent::Text { text } => json!({ "type": "text", "text": text }),
            ToolContent::Image { data, mime_type } => {
                json!({ "type": "image", "data": data, "mimeType": mime_type })
            },
            ToolContent::Resource { resource } => json!({ "type": "resource", "resource": resource }),
        })
        .collect();

    json!({ "content": content, "isError": result.is_error })
}

#[derive(Deserialize)]
pub struct ImportFromGithubBody {
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
}

pub async fn import_from_github(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ImportFromGithubBody>,
) -> ApiResult<impl IntoResponse> {
    let token = headers
        .get("X-GitHub-Token")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    let importer = crate::github_import::GitShellImporter::default();
    let discovered = importer
        .import(&body.repo, body.branch.as_deref(), token.as_deref())
        .await?;

    let mut registered = Vec::with_capacity(discovered.len());
    for mut config in discovered {
        config.provenance = Some(GithubProvenance {
            github_repo: body.repo.clone(),
            github_branch: body.branch.clone().unwrap_or_else(|| "main".to_string()),
            github_server_name: config.name.clone(),
        });
        state.manager.add(config.clone()).await?;
        registered.push(config);
    }

    Ok((StatusCode::CREATED, Json(registered)))
}

/// Used by the Server Manager's restart notifications to append a log line
/// into the Repository — kept here so both the watchdog and direct HTTP
/// log submission share the same append path. Not currently exposed as an
/// endpoint of its own; `spec.md` §6 only specifies reading logs.
#[allow(dead_code)]
async fn append_log(state: &AppState, server_id: &str, stream: LogStream, content: String) {
    let entry = fluidmcp_manager::ServerManager::log_entry(server_id, stream, content);
    let _ = state.repo.append_log(entry).await;
}
