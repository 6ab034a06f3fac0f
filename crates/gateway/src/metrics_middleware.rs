//! HTTP request metrics middleware: counts, durations, and in-flight gauge
//! for every request, with dynamic path segments (ids) normalized so they
//! don't blow up label cardinality. Carried over from the teacher's
//! `metrics_middleware.rs` with the metric/label source renamed.

use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use fluidmcp_metrics::{counter, gauge, histogram, http as http_metrics, labels};

pub async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = normalize_path(&path);

    gauge!(http_metrics::REQUESTS_IN_FLIGHT, labels::ENDPOINT => endpoint.clone(), labels::METHOD => method.clone())
        .increment(1.0);

    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();
    let duration = start.elapsed().as_secs_f64();

    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status.clone()
    )
    .increment(1);

    histogram!(
        http_metrics::REQUEST_DURATION_SECONDS,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status
    )
    .record(duration);

    gauge!(http_metrics::REQUESTS_IN_FLIGHT, labels::ENDPOINT => endpoint, labels::METHOD => method)
        .decrement(1.0);

    response
}

fn normalize_path(path: &str) -> String {
    let normalized = path
        .split('/')
        .map(|segment| {
            let is_dynamic = looks_like_uuid(segment)
                || (segment.chars().all(|c| c.is_ascii_digit()) && !segment.is_empty());
            if is_dynamic { "{id}" } else { segment }
        })
        .collect::<Vec<_>>()
        .join("/");

    let mut result = normalized;
    while result.contains("//") {
        result = result.replace("//", "/");
    }
    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }
    if result.is_empty() { "/".to_string() } else { result }
}

fn looks_like_uuid(s: &str) -> bool {
    if s.len() == 36 {
        let parts: Vec<&str> = s.split('-').collect();
        parts.len() == 5
            && parts[0].len() == 8
            && parts[1].len() == 4
            && parts[2].len() == 4
            && parts[3].len() == 4
            && parts[4].len() == 12
            && s.chars().filter(|c| *c != '-').all(|c| c.is_ascii_hexdigit())
    } else if s.len() == 32 {
        s.chars().all(|c| c.is_ascii_hexdigit())
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_replaces_dynamic_segments() {
        assert_eq!(normalize_path("/api/servers"), "/api/servers");
        assert_eq!(normalize_path("/api/servers/fs-server-1/status"), "/api/servers/fs-server-1/status");
        assert_eq!(normalize_path("/api/llm/models/12345"), "/api/llm/models/{id}");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/api/"), "/api");
    }

    #[test]
    fn looks_like_uuid_detects_both_forms() {
        assert!(looks_like_uuid("123e4567-e89b-12d3-a456-426614174000"));
        assert!(looks_like_uuid("123e4567e89b12d3a456426614174000"));
        assert!(!looks_like_uuid("fs-server-1"));
    }
}
