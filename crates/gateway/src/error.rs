//! Maps the shared [`fluidmcp_common::ErrorKind`] taxonomy onto HTTP status
//! codes, per `spec.md` §7: validation/business errors become structured
//! JSON bodies rather than bare status lines, but internal detail never
//! crosses the wire unsanitized.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fluidmcp_common::ErrorKind;
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError(pub fluidmcp_common::Error);

impl From<fluidmcp_common::Error> for ApiError {
    fn from(e: fluidmcp_common::Error) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.classify();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::LaunchFailed
            | ErrorKind::ChildError
            | ErrorKind::BackendAuth
            | ErrorKind::PersistenceDegraded
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // `detail` is the human-readable cause for operator-facing clients;
        // never includes stack traces or internal paths, matching §7's
        // "internal error details go to logs and traces, never to the wire".
        let body = ErrorBody {
            error: format!("{kind:?}"),
            detail: self.0.to_string(),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
