//! Maps the domain error taxonomy (§7) onto the JSON error envelope and
//! HTTP status codes the gateway promises in §10.1.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use taskgate_worker::{CancelError, ServiceError};

/// Wraps a [`ServiceError`] so this crate can implement [`IntoResponse`]
/// for it without running afoul of the orphan rule.
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

fn envelope(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code,
            message: message.into(),
        },
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ServiceError::Validation(err) => {
                envelope(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", err.to_string())
            }
            ServiceError::NotFound => envelope(StatusCode::NOT_FOUND, "NOT_FOUND", "task not found"),
            ServiceError::Cancel(CancelError::NotFound) => {
                envelope(StatusCode::NOT_FOUND, "NOT_FOUND", "task not found")
            }
            ServiceError::Cancel(CancelError::AlreadyTerminal { status }) => envelope(
                StatusCode::CONFLICT,
                "ALREADY_TERMINAL",
                format!("task already terminal ({status})"),
            ),
            ServiceError::Cancel(CancelError::Store(err)) => {
                envelope(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", err.to_string())
            }
            ServiceError::Store(err) => envelope(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", err.to_string()),
        }
    }
}
