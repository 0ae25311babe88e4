// src/handlers/attempts.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::attempt::{AttemptResultResponse, StartAttemptRequest, StartAttemptResponse},
    services::session_manager::SessionManager,
    utils::jwt::Claims,
};

/// Starts a new attempt on an exam.
///
/// * Requires a valid license grant for the exam.
/// * Fails with 409 while another attempt on the same exam is in progress.
#[utoipa::path(
    post,
    path = "/api/attempts",
    request_body = StartAttemptRequest,
    responses(
        (status = 201, description = "Attempt started", body = StartAttemptResponse),
        (status = 401, description = "Missing token or no valid license"),
        (status = 404, description = "Exam not found"),
        (status = 409, description = "Attempt already in progress")
    ),
    tag = "attempts"
)]
pub async fn start_attempt(
    State(sessions): State<Arc<SessionManager>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let started = sessions.start(req.exam_id, user_id).await?;

    Ok((StatusCode::CREATED, Json(started)))
}

/// Returns an attempt and, once graded, its per-section breakdown.
#[utoipa::path(
    get,
    path = "/api/attempts/{attempt_id}/result",
    params(("attempt_id" = i64, Path, description = "Attempt id")),
    responses(
        (status = 200, description = "Attempt result", body = AttemptResultResponse),
        (status = 403, description = "Attempt belongs to another user"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn get_attempt_result(
    State(sessions): State<Arc<SessionManager>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let result = sessions
        .attempt_result(attempt_id, user_id, claims.is_admin())
        .await?;

    Ok(Json(result))
}
