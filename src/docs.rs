// src/docs.rs

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    handlers::{admin, attempts, monitor, proctoring, sessions},
    models::{
        attempt::{
            Attempt, AttemptResultResponse, AttemptStatus, CursorResponse, MoveSectionRequest,
            SaveAnswerRequest, SaveAnswerResponse, SectionRef, SessionSnapshot,
            StartAttemptRequest, StartAttemptResponse, SubmitResponse,
        },
        proctoring::{AnomalyKind, ProctoringEntry, TabSwitchResponse},
        result::{Correctness, QuestionResult, SectionResult},
    },
};

#[derive(OpenApi)]
#[openapi(
    paths(
        attempts::start_attempt,
        attempts::get_attempt_result,
        sessions::get_session,
        sessions::save_answer,
        sessions::move_section,
        sessions::submit_session,
        proctoring::record_tab_switch,
        proctoring::record_heartbeat,
        monitor::list_active_sessions,
        admin::regrade_attempt,
    ),
    components(schemas(
        Attempt,
        AttemptStatus,
        AttemptResultResponse,
        StartAttemptRequest,
        StartAttemptResponse,
        SectionRef,
        SessionSnapshot,
        SaveAnswerRequest,
        SaveAnswerResponse,
        MoveSectionRequest,
        CursorResponse,
        SubmitResponse,
        SectionResult,
        QuestionResult,
        Correctness,
        ProctoringEntry,
        AnomalyKind,
        TabSwitchResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "attempts", description = "Starting attempts and reading results"),
        (name = "sessions", description = "Candidate session state"),
        (name = "proctoring", description = "Client-reported proctoring signals"),
        (name = "monitor", description = "Live exam monitoring"),
        (name = "admin", description = "Administrative operations")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
