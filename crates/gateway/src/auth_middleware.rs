//! Bearer-token auth middleware (`spec.md` §4.7, §8 invariant 7): when a
//! token is configured, every protected request must carry
//! `Authorization: Bearer <token>` matching it, compared in constant time
//! so response latency can't leak how many leading bytes matched. Grounded
//! on the teacher's `require_auth` tower-middleware shape
//! (`State<AppState>` + `Next`), simplified from its session-cookie/API-key
//! dual path down to the spec's single static token.

use axum::{
    Json,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.auth.bearer_token.as_deref() else {
        return next.run(request).await;
    };

    let supplied = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    // Length must match before `ct_eq` is meaningful; a length mismatch
    // leaks nothing beyond what an attacker already controls (their own
    // guess length), so it is checked outside the constant-time compare.
    let authorized = supplied.is_some_and(|token| {
        token.len() == expected.len() && bool::from(token.as_bytes().ct_eq(expected.as_bytes()))
    });

    if authorized {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Validation", "detail": "missing or invalid bearer token" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use subtle::ConstantTimeEq;

    #[test]
    fn equal_tokens_compare_equal() {
        assert!(bool::from(b"secret".ct_eq(b"secret")));
    }

    #[test]
    fn differing_tokens_compare_unequal() {
        assert!(!bool::from(b"secret".ct_eq(b"wrong!")));
    }
}
