//! `GET /health`: liveness probe. `database` reflects whether the
//! Repository answered a trivial read, not whether every subsystem is
//! healthy — matching `spec.md` §6's `{status, database}` shape.

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.repo.list_servers(false).await.is_ok();
    Json(json!({
        "status": "ok",
        "database": if database { "ok" } else { "degraded" },
    }))
}
