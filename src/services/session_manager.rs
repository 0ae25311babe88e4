// src/services/session_manager.rs

//! Attempt lifecycle: start, read, answer, navigate, submit.
//!
//! Expiry is evaluated lazily at the top of every operation. Status
//! transitions go through the repository's conditional writes, so two racing
//! requests can never both start or both submit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    config::{DEFAULT_SESSION_HOURS, SESSION_GRACE_MINUTES},
    error::AppError,
    models::{
        attempt::{
            AttemptResultResponse, AttemptStatus, CursorResponse, LiveSession, NewAttempt,
            SaveAnswerResponse, SectionRef, SessionSnapshot, StartAttemptResponse, SubmitResponse,
        },
        exam::Exam,
        result::GradeReport,
    },
    services::{
        events::{EventPublisher, LifecycleEvent},
        grading::GradingService,
    },
    store::{ExamCatalog, LicenseGate, SessionRepository},
    utils::clock::Clock,
};

/// Deadline for a session opened at `now`. Fixed for the session's lifetime.
pub fn session_deadline(now: DateTime<Utc>, estimated_minutes: Option<i32>) -> DateTime<Utc> {
    match estimated_minutes {
        Some(minutes) if minutes > 0 => {
            now + Duration::minutes(i64::from(minutes)) + Duration::minutes(SESSION_GRACE_MINUTES)
        }
        _ => now + Duration::hours(DEFAULT_SESSION_HOURS),
    }
}

impl From<GradeReport> for SubmitResponse {
    fn from(report: GradeReport) -> Self {
        SubmitResponse {
            attempt_id: report.attempt_id,
            total_score: report.total_score,
            max_score: report.max_score,
            percentage: report.percentage,
            time_spent_seconds: report.time_spent_seconds,
            sections: report.sections,
        }
    }
}

pub struct SessionManager {
    repo: Arc<dyn SessionRepository>,
    catalog: Arc<dyn ExamCatalog>,
    licenses: Arc<dyn LicenseGate>,
    events: Arc<dyn EventPublisher>,
    grading: Arc<GradingService>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        catalog: Arc<dyn ExamCatalog>,
        licenses: Arc<dyn LicenseGate>,
        events: Arc<dyn EventPublisher>,
        grading: Arc<GradingService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            catalog,
            licenses,
            events,
            grading,
            clock,
        }
    }

    /// Opens a new attempt for `user_id` on `exam_id`.
    ///
    /// An in-progress attempt whose session already expired is abandoned
    /// first; a live one makes this fail with `Conflict`.
    pub async fn start(&self, exam_id: i64, user_id: i64) -> Result<StartAttemptResponse, AppError> {
        let exam = self.load_exam(exam_id).await?;
        if !exam.is_active {
            return Err(AppError::BadRequest("Exam is not available".to_string()));
        }

        let license_ref = self.licenses.authorize(user_id, exam_id).await?;
        let now = self.clock.now();

        if let Some(existing) = self.repo.find_in_progress(user_id, exam_id).await? {
            if !existing.session.is_expired_at(now) {
                return Err(AppError::Conflict(
                    "An attempt for this exam is already in progress".to_string(),
                ));
            }
            if self.repo.mark_abandoned(existing.attempt.id).await? {
                tracing::info!(
                    attempt_id = existing.attempt.id,
                    user_id,
                    exam_id,
                    "Abandoned expired attempt"
                );
                self.events
                    .publish(LifecycleEvent::SessionAbandoned {
                        session_id: existing.session.id,
                        user_id,
                        exam_id,
                        timestamp: now,
                    })
                    .await;
            }
        }

        let first_section = exam.first_section();
        let live = self
            .repo
            .create_attempt(NewAttempt {
                user_id,
                exam_id,
                license_ref,
                started_at: now,
                expires_at: session_deadline(now, exam.estimated_minutes),
                first_section_id: first_section.map(|s| s.id),
            })
            .await?;

        tracing::info!(
            session_id = %live.session.id,
            attempt_id = live.attempt.id,
            user_id,
            exam_id,
            expires_at = %live.session.expires_at,
            "Attempt started"
        );

        self.events
            .publish(LifecycleEvent::SessionStarted {
                session_id: live.session.id,
                user_id,
                exam_id,
                estimated_minutes: exam.estimated_minutes,
                expires_at: live.session.expires_at,
                timestamp: now,
            })
            .await;

        Ok(StartAttemptResponse {
            session_id: live.session.id,
            attempt_id: live.attempt.id,
            first_section: first_section.map(|s| SectionRef {
                id: s.id,
                title: s.title.clone(),
                question_count: s.questions.len(),
            }),
            expires_at: live.session.expires_at,
        })
    }

    pub async fn get_state(
        &self,
        session_id: Uuid,
        user_id: i64,
    ) -> Result<SessionSnapshot, AppError> {
        let now = self.clock.now();
        let live = self.load_active(session_id, user_id, now).await?;
        let LiveSession { session, attempt } = live;

        Ok(SessionSnapshot {
            session_id: session.id,
            attempt_id: attempt.id,
            exam_id: attempt.exam_id,
            status: attempt.status,
            current_section_id: session.current_section_id,
            current_question: session.current_question,
            answers: session.answers,
            started_at: attempt.started_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
            remaining_seconds: (session.expires_at - now).num_seconds().max(0),
        })
    }

    /// Records one answer, overwriting any previous answer to the same question.
    pub async fn save_answer(
        &self,
        session_id: Uuid,
        user_id: i64,
        question_id: i64,
        answer: &str,
    ) -> Result<SaveAnswerResponse, AppError> {
        let now = self.clock.now();
        let live = self.load_active(session_id, user_id, now).await?;

        let exam = self.load_exam(live.attempt.exam_id).await?;
        if !exam.contains_question(question_id) {
            return Err(AppError::BadRequest(format!(
                "Question {} is not part of this exam",
                question_id
            )));
        }

        if !self
            .repo
            .save_answer(session_id, question_id, answer, now)
            .await?
        {
            return Err(self.rejected_write(session_id, user_id, now).await);
        }

        Ok(SaveAnswerResponse {
            question_id,
            saved_at: now,
        })
    }

    /// Moves the cursor to `question_number` of `section_id`.
    ///
    /// Sequential exams only allow staying in the current section or advancing
    /// to the one right after it.
    pub async fn move_section(
        &self,
        session_id: Uuid,
        user_id: i64,
        section_id: i64,
        question_number: i32,
    ) -> Result<CursorResponse, AppError> {
        let now = self.clock.now();
        let live = self.load_active(session_id, user_id, now).await?;
        let exam = self.load_exam(live.attempt.exam_id).await?;

        let target = exam.section(section_id).ok_or_else(|| {
            AppError::BadRequest(format!("Section {} is not part of this exam", section_id))
        })?;

        if !exam.allow_section_navigation {
            let current = live.session.current_section_id;
            let next = current.and_then(|id| exam.next_section(id)).map(|s| s.id);
            if current != Some(section_id) && next != Some(section_id) {
                return Err(AppError::BadRequest(
                    "This exam only allows moving forward one section at a time".to_string(),
                ));
            }
        }

        let last_question = target.questions.len().max(1) as i32;
        if question_number < 1 || question_number > last_question {
            return Err(AppError::BadRequest(format!(
                "Question number must be between 1 and {}",
                last_question
            )));
        }

        if !self
            .repo
            .update_cursor(session_id, section_id, question_number, now)
            .await?
        {
            return Err(self.rejected_write(session_id, user_id, now).await);
        }

        Ok(CursorResponse {
            section_id,
            question_number,
        })
    }

    /// Ends the attempt and grades it.
    ///
    /// Exactly one caller wins the `in_progress -> completed` transition; every
    /// other call gets `AlreadySubmitted`. A grading failure leaves the attempt
    /// `completed` for a later retry and is never rolled back.
    pub async fn submit(&self, session_id: Uuid, user_id: i64) -> Result<SubmitResponse, AppError> {
        let now = self.clock.now();
        let live = self.load_active(session_id, user_id, now).await?;
        let attempt = live.attempt;

        if !self.repo.mark_completed(attempt.id, now).await? {
            return Err(already_submitted());
        }

        tracing::info!(
            %session_id,
            attempt_id = attempt.id,
            user_id,
            "Attempt submitted"
        );

        self.events
            .publish(LifecycleEvent::SessionEnded {
                session_id,
                user_id,
                exam_id: attempt.exam_id,
                timestamp: now,
            })
            .await;

        let report = self
            .grading
            .grade_attempt(attempt.id)
            .await
            .map_err(|e| match e {
                AppError::GradingFailure(msg) => AppError::GradingFailure(msg),
                other => AppError::GradingFailure(other.to_string()),
            })?;

        Ok(report.into())
    }

    /// Re-runs grading for an attempt stuck in `completed`.
    pub async fn regrade(&self, attempt_id: i64) -> Result<SubmitResponse, AppError> {
        let report = self.grading.grade_attempt(attempt_id).await?;
        Ok(report.into())
    }

    /// Attempt summary with its section breakdown. Admins may read any attempt.
    pub async fn attempt_result(
        &self,
        attempt_id: i64,
        user_id: i64,
        is_admin: bool,
    ) -> Result<AttemptResultResponse, AppError> {
        let attempt = self
            .repo
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

        if attempt.user_id != user_id && !is_admin {
            return Err(AppError::Forbidden("Attempt belongs to another user".to_string()));
        }

        let sections = if attempt.status == AttemptStatus::Graded {
            self.repo.section_results(attempt_id).await?
        } else {
            Vec::new()
        };

        Ok(AttemptResultResponse { attempt, sections })
    }

    async fn load_exam(&self, exam_id: i64) -> Result<Exam, AppError> {
        self.catalog
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
    }

    /// Checks run by every session operation, in order: exists, owned by the
    /// caller, still in progress, not past its deadline.
    /// Explains a session write the store refused: the attempt was submitted
    /// or the deadline passed between the check and the write.
    async fn rejected_write(&self, session_id: Uuid, user_id: i64, now: DateTime<Utc>) -> AppError {
        match self.load_active(session_id, user_id, now).await {
            Err(e) => e,
            Ok(_) => already_submitted(),
        }
    }

    async fn load_active(
        &self,
        session_id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<LiveSession, AppError> {
        let live = self
            .repo
            .find_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if live.attempt.user_id != user_id {
            return Err(AppError::Forbidden("Session belongs to another user".to_string()));
        }
        if live.attempt.status != AttemptStatus::InProgress {
            return Err(already_submitted());
        }
        if live.session.is_expired_at(now) {
            return Err(AppError::Expired("Session has expired".to_string()));
        }

        Ok(live)
    }
}

fn already_submitted() -> AppError {
    AppError::AlreadySubmitted("Attempt already submitted".to_string())
}
