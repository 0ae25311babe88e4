// src/store/mod.rs

//! Persistence seams of the attempt runtime.
//!
//! The session manager, grading service and proctoring monitor depend on these
//! traits only. `postgres` is the production backing; `memory` keeps the same
//! guarantees in-process and backs the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, LiveSession, NewAttempt},
        exam::Exam,
        proctoring::AnomalyEvent,
        result::{GradeReport, SectionResult},
    },
};

pub mod memory;
pub mod postgres;

/// Durable attempts, sessions and results.
///
/// Every method that changes an attempt's status is a single conditional
/// write; callers never read-then-write to enforce a transition.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Inserts the attempt (status `in_progress`) together with its session.
    /// Fails with `Conflict` if the (user, exam) pair already has one in progress.
    async fn create_attempt(&self, new: NewAttempt) -> Result<LiveSession, AppError>;

    async fn find_in_progress(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<Option<LiveSession>, AppError>;

    /// `in_progress -> abandoned`. Returns false if the attempt had already moved on.
    async fn mark_abandoned(&self, attempt_id: i64) -> Result<bool, AppError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<LiveSession>, AppError>;

    /// Upserts one answer. Returns false if the attempt is no longer in progress
    /// or `at` is past the session deadline.
    async fn save_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        answer: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Moves the cursor. Returns false if the attempt is no longer in progress
    /// or `at` is past the session deadline.
    async fn update_cursor(
        &self,
        session_id: Uuid,
        section_id: i64,
        question_number: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// `in_progress -> completed`, stamping `submitted_at`.
    /// Returns false when another submit won the race.
    async fn mark_completed(
        &self,
        attempt_id: i64,
        submitted_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError>;

    async fn answers_for_attempt(&self, attempt_id: i64)
    -> Result<HashMap<i64, String>, AppError>;

    /// Writes section/question results and moves `completed -> graded` in one
    /// transaction. Returns false (and writes nothing) if the attempt is not `completed`.
    async fn save_grade(&self, report: &GradeReport) -> Result<bool, AppError>;

    async fn section_results(&self, attempt_id: i64) -> Result<Vec<SectionResult>, AppError>;
}

/// Read-only access to published exams and their answer keys.
#[async_trait]
pub trait ExamCatalog: Send + Sync {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError>;
}

/// License check performed before an attempt may start.
#[async_trait]
pub trait LicenseGate: Send + Sync {
    /// Returns the license reference to record on the attempt, or `AuthError`.
    async fn authorize(&self, user_id: i64, exam_id: i64) -> Result<Option<String>, AppError>;
}

/// Gate used when licensing is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllLicenses;

#[async_trait]
impl LicenseGate for AllowAllLicenses {
    async fn authorize(&self, _user_id: i64, _exam_id: i64) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}

/// Append-only record of proctoring anomalies.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &AnomalyEvent) -> Result<(), AppError>;
}
