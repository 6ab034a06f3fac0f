//! `GET /metrics`: Prometheus exposition format, unauthenticated so
//! scrapers don't need the bearer token. Grounded on the teacher's
//! `prometheus_metrics_handler`, trimmed to this gateway's single
//! `MetricsHandle` (no separate JSON/summary/history UI endpoints — those
//! served a dashboard this gateway doesn't have).

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::state::AppState;

pub async fn prometheus_metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.as_ref() {
        Some(handle) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
            .body(handle.render())
            .unwrap_or_else(|_| Response::new(String::new())),
        None => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::CONTENT_TYPE, "text/plain")
            .body("metrics not enabled".to_string())
            .unwrap_or_else(|_| Response::new(String::new())),
    }
}
