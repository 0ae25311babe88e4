// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, attempts, health, monitor, proctoring, sessions},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Candidate routes require a bearer token.
/// * Monitor and grading routes additionally require the admin role.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/openapi.json", get(health::openapi_json));

    let candidate_routes = Router::new()
        .route("/api/attempts", post(attempts::start_attempt))
        .route(
            "/api/attempts/{attempt_id}/result",
            get(attempts::get_attempt_result),
        )
        .route("/api/sessions/{session_id}", get(sessions::get_session))
        .route(
            "/api/sessions/{session_id}/answers",
            put(sessions::save_answer),
        )
        .route(
            "/api/sessions/{session_id}/cursor",
            put(sessions::move_section),
        )
        .route(
            "/api/sessions/{session_id}/submit",
            post(sessions::submit_session),
        )
        .route(
            "/api/sessions/{session_id}/tab-switch",
            post(proctoring::record_tab_switch),
        )
        .route(
            "/api/sessions/{session_id}/heartbeat",
            post(proctoring::record_heartbeat),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route(
            "/api/admin/monitor/sessions",
            get(monitor::list_active_sessions),
        )
        .route("/api/admin/monitor/ws", get(monitor::monitor_ws))
        .route(
            "/api/admin/attempts/{attempt_id}/grade",
            post(admin::regrade_attempt),
        )
        // Auth runs first, then the admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(candidate_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
