// src/store/memory.rs

//! In-process implementations of the store traits.
//!
//! A single mutex guards all attempt/session state, so every check-then-act
//! below is atomic just like the conditional updates in `postgres`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, AttemptStatus, LiveSession, NewAttempt, Session},
        exam::Exam,
        proctoring::AnomalyEvent,
        result::{GradeReport, QuestionResult, SectionResult},
    },
    store::{AuditLog, ExamCatalog, LicenseGate, SessionRepository},
};

#[derive(Default)]
struct Tables {
    attempts: HashMap<i64, Attempt>,
    sessions: HashMap<Uuid, Session>,
    section_results: HashMap<i64, Vec<SectionResult>>,
    question_results: HashMap<i64, Vec<QuestionResult>>,
}

impl Tables {
    fn live(&self, session: &Session) -> Result<LiveSession, AppError> {
        let attempt = self.attempts.get(&session.attempt_id).ok_or_else(|| {
            AppError::InternalServerError(format!(
                "Session {} points at missing attempt {}",
                session.id, session.attempt_id
            ))
        })?;
        Ok(LiveSession {
            session: session.clone(),
            attempt: attempt.clone(),
        })
    }

    fn is_in_progress(&self, attempt_id: i64) -> bool {
        self.attempts
            .get(&attempt_id)
            .is_some_and(|a| a.status == AttemptStatus::InProgress)
    }
}

/// Attempt store kept in memory.
#[derive(Default)]
pub struct MemorySessionStore {
    tables: Mutex<Tables>,
    next_attempt_id: AtomicI64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Question results written for an attempt, in grading order.
    pub async fn question_results(&self, attempt_id: i64) -> Vec<QuestionResult> {
        self.tables
            .lock()
            .await
            .question_results
            .get(&attempt_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionStore {
    async fn create_attempt(&self, new: NewAttempt) -> Result<LiveSession, AppError> {
        let mut tables = self.tables.lock().await;

        let duplicate = tables.attempts.values().any(|a| {
            a.user_id == new.user_id
                && a.exam_id == new.exam_id
                && a.status == AttemptStatus::InProgress
        });
        if duplicate {
            return Err(AppError::Conflict(
                "An attempt for this exam is already in progress".to_string(),
            ));
        }

        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt = Attempt {
            id,
            user_id: new.user_id,
            exam_id: new.exam_id,
            status: AttemptStatus::InProgress,
            started_at: new.started_at,
            submitted_at: None,
            total_score: None,
            max_score: None,
            percentage: None,
            time_spent_seconds: None,
            license_ref: new.license_ref,
        };
        let session = Session {
            id: Uuid::new_v4(),
            attempt_id: id,
            current_section_id: new.first_section_id,
            current_question: 1,
            answers: HashMap::new(),
            last_activity_at: new.started_at,
            expires_at: new.expires_at,
        };

        tables.attempts.insert(id, attempt.clone());
        tables.sessions.insert(session.id, session.clone());

        Ok(LiveSession { session, attempt })
    }

    async fn find_in_progress(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<Option<LiveSession>, AppError> {
        let tables = self.tables.lock().await;
        let attempt_id = tables
            .attempts
            .values()
            .find(|a| {
                a.user_id == user_id && a.exam_id == exam_id && a.status == AttemptStatus::InProgress
            })
            .map(|a| a.id);

        let Some(attempt_id) = attempt_id else {
            return Ok(None);
        };
        match tables.sessions.values().find(|s| s.attempt_id == attempt_id) {
            Some(session) => tables.live(session).map(Some),
            None => Ok(None),
        }
    }

    async fn mark_abandoned(&self, attempt_id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.attempts.get_mut(&attempt_id) {
            Some(a) if a.status == AttemptStatus::InProgress => {
                a.status = AttemptStatus::Abandoned;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<LiveSession>, AppError> {
        let tables = self.tables.lock().await;
        match tables.sessions.get(&session_id) {
            Some(session) => tables.live(session).map(Some),
            None => Ok(None),
        }
    }

    async fn save_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        answer: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(attempt_id) = tables.sessions.get(&session_id).map(|s| s.attempt_id) else {
            return Err(AppError::NotFound("Session not found".to_string()));
        };
        if !tables.is_in_progress(attempt_id) {
            return Ok(false);
        }
        if let Some(session) = tables.sessions.get_mut(&session_id) {
            if session.is_expired_at(at) {
                return Ok(false);
            }
            session.answers.insert(question_id, answer.to_string());
            session.last_activity_at = at;
        }
        Ok(true)
    }

    async fn update_cursor(
        &self,
        session_id: Uuid,
        section_id: i64,
        question_number: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(attempt_id) = tables.sessions.get(&session_id).map(|s| s.attempt_id) else {
            return Err(AppError::NotFound("Session not found".to_string()));
        };
        if !tables.is_in_progress(attempt_id) {
            return Ok(false);
        }
        if let Some(session) = tables.sessions.get_mut(&session_id) {
            if session.is_expired_at(at) {
                return Ok(false);
            }
            session.current_section_id = Some(section_id);
            session.current_question = question_number;
            session.last_activity_at = at;
        }
        Ok(true)
    }

    async fn mark_completed(
        &self,
        attempt_id: i64,
        submitted_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.attempts.get_mut(&attempt_id) {
            Some(a) if a.status == AttemptStatus::InProgress => {
                a.status = AttemptStatus::Completed;
                a.submitted_at = Some(submitted_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError> {
        Ok(self.tables.lock().await.attempts.get(&attempt_id).cloned())
    }

    async fn answers_for_attempt(
        &self,
        attempt_id: i64,
    ) -> Result<HashMap<i64, String>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| s.attempt_id == attempt_id)
            .map(|s| s.answers.clone())
            .unwrap_or_default())
    }

    async fn save_grade(&self, report: &GradeReport) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        match tables.attempts.get_mut(&report.attempt_id) {
            Some(a) if a.status == AttemptStatus::Completed => {
                a.status = AttemptStatus::Graded;
                a.total_score = Some(report.total_score);
                a.max_score = Some(report.max_score);
                a.percentage = Some(report.percentage);
                a.time_spent_seconds = Some(report.time_spent_seconds);
            }
            _ => return Ok(false),
        }
        tables
            .section_results
            .insert(report.attempt_id, report.sections.clone());
        tables
            .question_results
            .insert(report.attempt_id, report.questions.clone());
        Ok(true)
    }

    async fn section_results(&self, attempt_id: i64) -> Result<Vec<SectionResult>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .section_results
            .get(&attempt_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Exam catalog seeded by hand.
#[derive(Default)]
pub struct MemoryExamCatalog {
    exams: RwLock<HashMap<i64, Exam>>,
}

impl MemoryExamCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, exam: Exam) {
        self.exams.write().await.insert(exam.id, exam);
    }
}

#[async_trait]
impl ExamCatalog for MemoryExamCatalog {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        Ok(self.exams.read().await.get(&exam_id).cloned())
    }
}

/// License gate backed by an explicit list of (user, exam) grants.
#[derive(Default)]
pub struct MemoryLicenseGate {
    grants: RwLock<HashMap<(i64, i64), String>>,
}

impl MemoryLicenseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, user_id: i64, exam_id: i64, license_key: &str) {
        self.grants
            .write()
            .await
            .insert((user_id, exam_id), license_key.to_string());
    }
}

#[async_trait]
impl LicenseGate for MemoryLicenseGate {
    async fn authorize(&self, user_id: i64, exam_id: i64) -> Result<Option<String>, AppError> {
        self.grants
            .read()
            .await
            .get(&(user_id, exam_id))
            .cloned()
            .map(Some)
            .ok_or_else(|| AppError::AuthError("No valid license for this exam".to_string()))
    }
}

/// Audit log kept in memory.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AnomalyEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AnomalyEvent> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, event: &AnomalyEvent) -> Result<(), AppError> {
        self.entries.lock().await.push(event.clone());
        Ok(())
    }
}
