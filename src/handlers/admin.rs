// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::AppError, models::attempt::SubmitResponse, services::session_manager::SessionManager,
};

/// Re-runs grading for an attempt left `completed` by a failed grading run.
/// Admin only.
#[utoipa::path(
    post,
    path = "/api/admin/attempts/{attempt_id}/grade",
    params(("attempt_id" = i64, Path, description = "Attempt id")),
    responses(
        (status = 200, description = "Attempt graded", body = SubmitResponse),
        (status = 400, description = "Attempt is not awaiting grading"),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt already graded"),
        (status = 503, description = "Grading failed again")
    ),
    tag = "admin"
)]
pub async fn regrade_attempt(
    State(sessions): State<Arc<SessionManager>>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(attempt_id, "Manual grading requested");
    let result = sessions.regrade(attempt_id).await?;
    Ok(Json(result))
}
