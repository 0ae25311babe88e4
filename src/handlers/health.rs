// src/handlers/health.rs

use axum::{Json, response::IntoResponse};
use serde_json::json;

use crate::docs::ApiDoc;
use utoipa::OpenApi;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serves the generated OpenAPI document.
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
