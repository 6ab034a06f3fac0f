//! `/api/llm/*`: LLM Dispatcher registration and OpenAI-compatible
//! completion endpoints (`spec.md` §4.5). Tool opt-in hands the request to
//! the Function-Call Router instead of the backend directly; per §4.5's
//! note that implementations may forgo streaming while tools are in play,
//! this gateway disables streaming whenever `tools` is non-empty and
//! `tool_choice != "none"`.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use fluidmcp_persistence::types::{LlmBackendType, LlmModel};
use fluidmcp_providers::Backend;
use fluidmcp_router::{FunctionRouter, RouterConfig};
use fluidmcp_tools::ToolRegistry;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

fn persistence_err(e: fluidmcp_persistence::Error) -> ApiError {
    match e {
        fluidmcp_persistence::Error::Duplicate(id) => {
            fluidmcp_common::Error::conflict(format!("model '{id}' already registered")).into()
        },
        fluidmcp_persistence::Error::NotFound(id) => {
            fluidmcp_common::Error::not_found(format!("model '{id}' not found")).into()
        },
        other => fluidmcp_common::Error::persistence_degraded(other.to_string()).into(),
    }
}

#[derive(Deserialize)]
pub struct LlmModelWire {
    pub model_id: String,
    pub backend_type: LlmBackendType,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_params: serde_json::Value,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    120
}

pub async fn list_models(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let models = state.repo.list_models().await.map_err(persistence_err)?;
    Ok(Json(models))
}

pub async fn register_model(
    State(state): State<AppState>,
    Json(wire): Json<LlmModelWire>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let model = LlmModel {
        model_id: wire.model_id,
        backend_type: wire.backend_type,
        base_url: wire.base_url,
        api_key: wire.api_key,
        default_params: wire.default_params,
        timeout_sec: wire.timeout_sec,
        created_at: now,
        updated_at: now,
        version: 1,
    };

    // Fails fast on a malformed model (missing base_url, missing Replicate
    // version, ...) before it is ever persisted.
    Backend::build(&model)?;

    state.repo.save_model(model.clone()).await.map_err(persistence_err)?;
    Ok((StatusCode::CREATED, Json(model)))
}

pub async fn unregister_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.repo.delete_model(&model_id).await.map_err(persistence_err)?;
    if !deleted {
        return Err(fluidmcp_common::Error::not_found(format!("model '{model_id}' not found")).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn load_backend(state: &AppState, model_id: &str) -> ApiResult<Backend> {
    let model = state
        .repo
        .get_model(model_id)
        .await
        .map_err(persistence_err)?
        .ok_or_else(|| fluidmcp_common::Error::not_found(format!("model '{model_id}' not found")))?;
    Ok(Backend::build(&model)?)
}

fn wants_tools(body: &serde_json::Value) -> bool {
    let has_tools = body
        .get("tools")
        .and_then(serde_json::Value::as_array)
        .is_some_and(|t| !t.is_empty());
    let tool_choice_none = body.get("tool_choice").and_then(serde_json::Value::as_str) == Some("none");
    has_tools && !tool_choice_none
}

async fn dispatch_with_tools(
    state: &AppState,
    model_id: &str,
    backend: Backend,
    body: serde_json::Value,
) -> ApiResult<serde_json::Value> {
    let registry: ToolRegistry = state.build_tool_registry().await?;
    let executor = crate::state::tool_executor(registry.clone());
    let router = FunctionRouter::new(registry, executor, model_id).with_config(RouterConfig::default());

    let messages = body
        .get("messages")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    let tools = body.get("tools").and_then(serde_json::Value::as_array).cloned();
    let tool_choice = body.get("tool_choice").and_then(serde_json::Value::as_str).unwrap_or("auto");

    let mut extra = serde_json::Map::new();
    if let Some(obj) = body.as_object() {
        for (k, v) in obj {
            if !matches!(k.as_str(), "messages" | "tools" | "tool_choice" | "model" | "stream") {
                extra.insert(k.clone(), v.clone());
            }
        }
    }

    let cancel = CancellationToken::new();
    router
        .handle_completion(messages, &backend, tools, tool_choice, extra, &cancel)
        .await
        .map_err(|e| fluidmcp_common::Error::child_error(e.to_string()).into())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Response> {
    let backend = load_backend(&state, &model_id).await?;
    let streaming = body.get("stream").and_then(serde_json::Value::as_bool).unwrap_or(false);

    if wants_tools(&body) {
        let result = dispatch_with_tools(&state, &model_id, backend, body).await?;
        return Ok(Json(result).into_response());
    }

    if streaming {
        let stream = backend.stream(body).await?;
        let body = Body::from_stream(stream);
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(body)
            .unwrap_or_else(|_| Response::new(Body::empty())));
    }

    let result = backend.complete(body).await?;
    Ok(Json(result).into_response())
}

/// `POST /api/llm/{model_id}/v1/completions`: legacy text-completion shape.
/// Tool opt-in does not apply here (the legacy API has no `tools` field);
/// requests are proxied straight through to the backend.
pub async fn completions(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Response> {
    let backend = load_backend(&state, &model_id).await?;
    let streaming = body.get("stream").and_then(serde_json::Value::as_bool).unwrap_or(false);

    if streaming {
        let stream = backend.stream(body).await?;
        let body = Body::from_stream(stream);
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(body)
            .unwrap_or_else(|_| Response::new(Body::empty())));
    }

    let result = backend.complete(body).await?;
    Ok(Json(result).into_response())
}
