//! Gateway: the HTTP surface in front of the Server Manager and LLM
//! Dispatcher.
//!
//! Lifecycle:
//! 1. Load config (allowlist, persistence backend, bearer token).
//! 2. Build `AppState` and the axum `Router`.
//! 3. Bind and serve, with bearer-auth and HTTP-metrics layers wrapping
//!    every route except `/health` and `/metrics`.
//!
//! Process-supervision logic lives in `fluidmcp-manager`, tool dispatch in
//! `fluidmcp-tools`/`fluidmcp-router`, LLM backends in `fluidmcp-providers` —
//! this crate only wires HTTP onto them.

pub mod auth_middleware;
pub mod error;
pub mod github_import;
pub mod health;
pub mod llm;
#[cfg(feature = "metrics")]
pub mod metrics_middleware;
#[cfg(feature = "metrics")]
pub mod metrics_routes;
pub mod servers;
pub mod state;

use axum::{
    Router,
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::{AppState, AuthConfig};

/// Assembles the full route table. `/health` and `/metrics` are reachable
/// without a bearer token so liveness probes and Prometheus scrapers don't
/// need one; every other route is wrapped in [`auth_middleware::require_bearer_token`].
#[must_use]
pub fn build_router(state: AppState) -> Router {
    #[cfg(feature = "metrics")]
    let metrics_route = get(metrics_routes::prometheus_metrics_handler);
    #[cfg(not(feature = "metrics"))]
    let metrics_route = get(metrics_disabled);

    let protected = Router::new()
        .route("/api/servers", get(servers::list_servers).post(servers::add_server))
        .route("/api/servers/from-github", post(servers::import_from_github))
        .route(
            "/api/servers/{id}",
            get(servers::get_server).put(servers::update_server).delete(servers::delete_server),
        )
        .route("/api/servers/{id}/start", post(servers::start_server))
        .route("/api/servers/{id}/stop", post(servers::stop_server))
        .route("/api/servers/{id}/status", get(servers::server_status))
        .route("/api/servers/{id}/logs", get(servers::server_logs))
        .route("/api/servers/{id}/tools/{tool_name}/run", post(servers::run_tool))
        .route("/api/llm/models", get(llm::list_models).post(llm::register_model))
        .route("/api/llm/models/{id}", delete(llm::unregister_model))
        .route("/api/llm/{model_id}/v1/chat/completions", post(llm::chat_completions))
        .route("/api/llm/{model_id}/v1/completions", post(llm::completions))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware::require_bearer_token));

    #[cfg_attr(not(feature = "metrics"), allow(unused_mut))]
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", metrics_route)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    #[cfg(feature = "metrics")]
    {
        router = router.layer(middleware::from_fn(metrics_middleware::http_metrics_middleware));
    }

    router.with_state(state)
}

#[cfg(not(feature = "metrics"))]
async fn metrics_disabled() -> impl axum::response::IntoResponse {
    (axum::http::StatusCode::SERVICE_UNAVAILABLE, "metrics not enabled")
}
