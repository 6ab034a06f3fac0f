//! End-to-end coverage of the route table over `tower::ServiceExt::oneshot`,
//! matching the teacher's convention of driving the router directly rather
//! than binding a real socket. In-memory repository only — no child
//! processes are actually spawned.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use fluidmcp_gateway::{AppState, AuthConfig, build_router};
use fluidmcp_manager::{ServerManager, allowlist::CommandAllowlist};
use fluidmcp_persistence::{InMemoryRepository, Repository};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_router(auth: AuthConfig) -> Router {
    let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = Arc::new(ServerManager::new(repo.clone(), dir.path().to_path_buf(), CommandAllowlist::default()));
    let state = AppState::new(manager, repo, auth);
    build_router(state)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&v).expect("serialize"))
        },
        None => Body::empty(),
    };
    let request = builder.body(body).expect("build request");
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("valid json") };
    (status, value)
}

#[tokio::test]
async fn health_check_reports_ok_without_auth() {
    let router = test_router(AuthConfig::required("secret"));
    let (status, body) = send(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_route_without_token_is_unauthorized() {
    let router = test_router(AuthConfig::required("secret"));
    let (status, _) = send(&router, "GET", "/api/servers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_with_wrong_token_is_unauthorized() {
    let router = test_router(AuthConfig::required("secret"));
    let (status, _) = send(&router, "GET", "/api/servers", None, Some("nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn disabled_auth_allows_requests_without_a_token() {
    let router = test_router(AuthConfig::disabled());
    let (status, _) = send(&router, "GET", "/api/servers", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn add_then_list_then_get_server_round_trips() {
    let router = test_router(AuthConfig::disabled());
    let create_body = json!({
        "id": "fs",
        "name": "filesystem",
        "command": "npx",
        "args": ["-y", "@modelcontextprotocol/server-filesystem"],
    });
    let (status, created) = send(&router, "POST", "/api/servers", Some(create_body), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "fs");

    let (status, list) = send(&router, "GET", "/api/servers", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().expect("array").len(), 1);

    let (status, fetched) = send(&router, "GET", "/api/servers/fs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["command"], "npx");
}

#[tokio::test]
async fn adding_server_with_disallowed_command_is_rejected() {
    let router = test_router(AuthConfig::disabled());
    let body = json!({ "id": "evil", "name": "evil", "command": "rm", "args": ["-rf", "/"] });
    let (status, response) = send(&router, "POST", "/api/servers", Some(body), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Validation");
}

#[tokio::test]
async fn adding_duplicate_server_id_conflicts() {
    let router = test_router(AuthConfig::disabled());
    let body = json!({ "id": "fs", "name": "fs", "command": "npx", "args": [] });
    let (status, _) = send(&router, "POST", "/api/servers", Some(body.clone()), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&router, "POST", "/api/servers", Some(body), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn getting_unknown_server_is_not_found() {
    let router = test_router(AuthConfig::disabled());
    let (status, _) = send(&router, "GET", "/api/servers/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registering_llm_model_then_listing_round_trips() {
    let router = test_router(AuthConfig::disabled());
    let body = json!({
        "model_id": "local-llama",
        "backend_type": "vllm",
        "base_url": "http://localhost:8001/v1",
    });
    let (status, created) = send(&router, "POST", "/api/llm/models", Some(body), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["model_id"], "local-llama");

    let (status, list) = send(&router, "GET", "/api/llm/models", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().expect("array").len(), 1);
}

#[tokio::test]
async fn registering_llm_model_without_base_url_is_rejected() {
    let router = test_router(AuthConfig::disabled());
    let body = json!({ "model_id": "broken", "backend_type": "vllm" });
    let (status, _) = send(&router, "POST", "/api/llm/models", Some(body), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unregistering_unknown_model_is_not_found() {
    let router = test_router(AuthConfig::disabled());
    let (status, _) = send(&router, "DELETE", "/api/llm/models/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
