// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request (validation, navigation rules, unknown section/question)
    BadRequest(String),

    // 401 Unauthorized (token or license gate)
    AuthError(String),

    // 403 Forbidden (session owned by someone else)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., attempt already in progress)
    Conflict(String),

    // 400 Bad Request, the session deadline has passed
    Expired(String),

    // 400 Bad Request, the attempt left `in_progress`
    AlreadySubmitted(String),

    // 503 Service Unavailable. The submission stands; grading can be re-run.
    GradingFailure(String),
}

impl AppError {
    /// Stable machine-readable kind, rendered as `code` in the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InternalServerError(_) => "internal_error",
            AppError::BadRequest(_) => "validation_error",
            AppError::AuthError(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Expired(_) => "expired",
            AppError::AlreadySubmitted(_) => "already_submitted",
            AppError::GradingFailure(_) => "grading_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::Expired(_) | AppError::AlreadySubmitted(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::GradingFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let retryable = matches!(self, AppError::GradingFailure(_));

        let error_message = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::GradingFailure(msg) => {
                tracing::error!("Grading failed: {}", msg);
                "Submission recorded but grading failed; it will be retried".to_string()
            }
            AppError::BadRequest(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Expired(msg)
            | AppError::AlreadySubmitted(msg) => msg,
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_is_a_distinct_bad_request() {
        let err = AppError::Expired("Session expired".to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "expired");
    }

    #[test]
    fn grading_failure_is_retryable_unavailable() {
        let response = AppError::GradingFailure("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn conflict_maps_to_409() {
        let response = AppError::Conflict("in progress".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
