// src/handlers/proctoring.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::proctoring::TabSwitchResponse,
    services::proctoring::ProctoringMonitor,
    utils::jwt::Claims,
};

/// Only the candidate who owns a proctored session may report on it.
async fn ensure_owner(
    monitor: &ProctoringMonitor,
    session_id: Uuid,
    claims: &Claims,
) -> Result<(), AppError> {
    let entry = monitor
        .entry(session_id)
        .await
        .ok_or_else(|| AppError::NotFound("Session is not being proctored".to_string()))?;

    if entry.user_id != claims.user_id()? {
        return Err(AppError::Forbidden("Session belongs to another user".to_string()));
    }
    Ok(())
}

/// Reports that the candidate left the exam tab.
#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/tab-switch",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Running tab-switch count", body = TabSwitchResponse),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not proctored")
    ),
    tag = "proctoring"
)]
pub async fn record_tab_switch(
    State(monitor): State<Arc<ProctoringMonitor>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    ensure_owner(&monitor, session_id, &claims).await?;

    let tab_switches = monitor
        .record_tab_switch(session_id)
        .await
        .ok_or_else(|| AppError::NotFound("Session is not being proctored".to_string()))?;

    Ok(Json(TabSwitchResponse {
        session_id,
        tab_switches,
    }))
}

/// Keep-alive from the candidate's client.
#[utoipa::path(
    post,
    path = "/api/sessions/{session_id}/heartbeat",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Heartbeat recorded"),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "Session not proctored")
    ),
    tag = "proctoring"
)]
pub async fn record_heartbeat(
    State(monitor): State<Arc<ProctoringMonitor>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    ensure_owner(&monitor, session_id, &claims).await?;

    if !monitor.record_heartbeat(session_id).await {
        return Err(AppError::NotFound("Session is not being proctored".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
