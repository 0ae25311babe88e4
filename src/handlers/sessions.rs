// src/handlers/sessions.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::attempt::{
        CursorResponse, MoveSectionRequest, SaveAnswerRequest, SaveAnswerResponse,
        SessionSnapshot, SubmitResponse,
    },
    services::session_manager::SessionManager,
    utils::jwt::Claims,
};

/// Returns the caller's live session.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionSnapshot),
        (status = 400, description = "Session expired or already submitted"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(sessions): State<Arc<SessionManager>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = sessions.get_state(session_id, claims.user_id()?).await?;
    Ok(Json(snapshot))
}

/// Saves one answer. A later save to the same question replaces it.
#[utoipa::path(
    put,
    path = "/api/sessions/{session_id}/answers",
    params(("session_id" = Uuid, Path, description = "Session id")),
    request_body = SaveAnswerRequest,
    responses(
        (status = 200, description = "Answer saved", body = SaveAnswerResponse),
        (status = 400, description = "Expired, submitted, or unknown question"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn save_answer(
    State(sessions): State<Arc<SessionManager>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let saved = sessions
        .save_answer(session_id, claims.user_id()?, req.question_id, &req.answer)
        .await?;

    Ok(Json(saved))
}

/// Moves the section/question cursor.
#[utoipa::path(
    put,
    path = "/api/sessions/{session_id}/cursor",
    params(("session_id" = Uuid, Path, description = "Session id")),
    request_body = MoveSectionRequest,
    responses(
        (status = 200, description = "Cursor moved", body = CursorResponse),
        (status = 400, description = "Navigation not allowed, or session expired/submitted"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn move_section(
    State(sessions): State<Arc<SessionManager>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<MoveSectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = req.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let cursor = sessions
        .move_section(session_id, claims.user_id()?, req.section_id, req.question_number)
        .await?;

    Ok(Json(cursor))
}

/// Submits the attempt and returns the graded result.
///
/// Only the first submit succeeds; repeats get 400 `already_submitted`.
#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/submit",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Submitted and graded", body = SubmitResponse),
        (status = 400, description = "Already submitted or expired"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not found"),
        (status = 503, description = "Submitted, grading pending retry")
    ),
    tag = "sessions"
)]
pub async fn submit_session(
    State(sessions): State<Arc<SessionManager>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = sessions.submit(session_id, claims.user_id()?).await?;
    Ok(Json(result))
}
