// src/models/attempt.rs

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{error::AppError, models::result::SectionResult};

/// Lifecycle of an attempt.
///
/// `in_progress -> completed -> graded`, or `in_progress -> abandoned` once an
/// expired session is superseded by a new start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Graded,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Graded => "graded",
            AttemptStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            "graded" => Ok(AttemptStatus::Graded),
            "abandoned" => Ok(AttemptStatus::Abandoned),
            other => Err(AppError::InternalServerError(format!(
                "Unknown attempt status '{}'",
                other
            ))),
        }
    }
}

/// Represents the 'exam_attempts' table.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub exam_id: i64,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub total_score: Option<i64>,
    pub max_score: Option<i64>,
    pub percentage: Option<f64>,
    pub time_spent_seconds: Option<i64>,
    /// License used to unlock the attempt. Kept for audit only.
    pub license_ref: Option<String>,
}

/// Represents the 'exam_sessions' table: live state of an in-progress attempt.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub attempt_id: i64,
    pub current_section_id: Option<i64>,
    /// 1-based question number within the current section.
    pub current_question: i32,
    /// Question id -> submitted answer.
    pub answers: HashMap<i64, String>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Deadline check; the boundary instant itself is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A session joined with its attempt.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session: Session,
    pub attempt: Attempt,
}

/// Everything the store needs to open a new attempt.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub user_id: i64,
    pub exam_id: i64,
    pub license_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub first_section_id: Option<i64>,
}

/// DTO for starting an attempt.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartAttemptRequest {
    pub exam_id: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SectionRef {
    pub id: i64,
    pub title: String,
    pub question_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartAttemptResponse {
    pub session_id: Uuid,
    pub attempt_id: i64,
    pub first_section: Option<SectionRef>,
    pub expires_at: DateTime<Utc>,
}

/// Read-only projection of a session, returned to its owner.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub attempt_id: i64,
    pub exam_id: i64,
    pub status: AttemptStatus,
    pub current_section_id: Option<i64>,
    pub current_question: i32,
    pub answers: HashMap<i64, String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
}

/// DTO for saving one answer.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SaveAnswerRequest {
    pub question_id: i64,
    #[validate(length(max = 10000, message = "Answer must be at most 10000 characters."))]
    pub answer: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SaveAnswerResponse {
    pub question_id: i64,
    pub saved_at: DateTime<Utc>,
}

/// DTO for moving the section/question cursor.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MoveSectionRequest {
    pub section_id: i64,
    #[validate(range(min = 1, message = "Question number starts at 1."))]
    pub question_number: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CursorResponse {
    pub section_id: i64,
    pub question_number: i32,
}

/// Final outcome returned by submit and by the admin regrade endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub attempt_id: i64,
    pub total_score: i64,
    pub max_score: i64,
    pub percentage: f64,
    pub time_spent_seconds: i64,
    pub sections: Vec<SectionResult>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttemptResultResponse {
    pub attempt: Attempt,
    pub sections: Vec<SectionResult>,
}
