// src/store/postgres.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, LiveSession, NewAttempt, Session},
        exam::{Exam, ExamQuestion, ExamSection},
        proctoring::AnomalyEvent,
        result::{GradeReport, SectionResult},
    },
    store::{AuditLog, ExamCatalog, LicenseGate, SessionRepository},
};

const ATTEMPT_COLUMNS: &str = "a.id, a.user_id, a.exam_id, a.status, a.started_at, a.submitted_at, \
     a.total_score, a.max_score, a.percentage, a.time_spent_seconds, a.license_ref";

const LIVE_SESSION_SELECT: &str = "SELECT \
     s.id AS session_id, s.current_section_id, s.current_question, s.answers, \
     s.last_activity_at, s.expires_at, \
     a.id, a.user_id, a.exam_id, a.status, a.started_at, a.submitted_at, \
     a.total_score, a.max_score, a.percentage, a.time_spent_seconds, a.license_ref \
     FROM exam_sessions s JOIN exam_attempts a ON a.id = s.attempt_id";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Row of 'exam_attempts'; status is kept as text in the database.
#[derive(FromRow)]
struct AttemptRow {
    id: i64,
    user_id: i64,
    exam_id: i64,
    status: String,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    total_score: Option<i64>,
    max_score: Option<i64>,
    percentage: Option<f64>,
    time_spent_seconds: Option<i64>,
    license_ref: Option<String>,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Attempt {
            id: row.id,
            user_id: row.user_id,
            exam_id: row.exam_id,
            status: row.status.parse()?,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            total_score: row.total_score,
            max_score: row.max_score,
            percentage: row.percentage,
            time_spent_seconds: row.time_spent_seconds,
            license_ref: row.license_ref,
        })
    }
}

/// Session joined with its attempt.
#[derive(FromRow)]
struct LiveSessionRow {
    session_id: Uuid,
    current_section_id: Option<i64>,
    current_question: i32,
    answers: Json<HashMap<i64, String>>,
    last_activity_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[sqlx(flatten)]
    attempt: AttemptRow,
}

impl TryFrom<LiveSessionRow> for LiveSession {
    type Error = AppError;

    fn try_from(row: LiveSessionRow) -> Result<Self, Self::Error> {
        let attempt = Attempt::try_from(row.attempt)?;
        Ok(LiveSession {
            session: Session {
                id: row.session_id,
                attempt_id: attempt.id,
                current_section_id: row.current_section_id,
                current_question: row.current_question,
                answers: row.answers.0,
                last_activity_at: row.last_activity_at,
                expires_at: row.expires_at,
            },
            attempt,
        })
    }
}

#[derive(FromRow)]
struct SectionResultRow {
    section_id: i64,
    correct_count: i32,
    incorrect_count: i32,
    unanswered_count: i32,
    score: i64,
    max_score: i64,
}

/// Attempt store on PostgreSQL.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionStore {
    async fn create_attempt(&self, new: NewAttempt) -> Result<LiveSession, AppError> {
        let mut tx = self.pool.begin().await?;

        // The partial unique index on (user_id, exam_id) WHERE status = 'in_progress'
        // is what actually serializes concurrent starts.
        let attempt_row = sqlx::query_as::<_, AttemptRow>(&format!(
            "INSERT INTO exam_attempts AS a (user_id, exam_id, status, started_at, license_ref)
             VALUES ($1, $2, 'in_progress', $3, $4)
             RETURNING {}",
            ATTEMPT_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.exam_id)
        .bind(new.started_at)
        .bind(&new.license_ref)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("An attempt for this exam is already in progress".to_string())
            } else {
                tracing::error!("Failed to insert attempt: {:?}", e);
                AppError::from(e)
            }
        })?;
        let attempt = Attempt::try_from(attempt_row)?;

        let session_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO exam_sessions
                (id, attempt_id, current_section_id, current_question, answers, last_activity_at, expires_at)
             VALUES ($1, $2, $3, 1, '{}'::jsonb, $4, $5)",
        )
        .bind(session_id)
        .bind(attempt.id)
        .bind(new.first_section_id)
        .bind(new.started_at)
        .bind(new.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LiveSession {
            session: Session {
                id: session_id,
                attempt_id: attempt.id,
                current_section_id: new.first_section_id,
                current_question: 1,
                answers: HashMap::new(),
                last_activity_at: new.started_at,
                expires_at: new.expires_at,
            },
            attempt,
        })
    }

    async fn find_in_progress(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<Option<LiveSession>, AppError> {
        let row = sqlx::query_as::<_, LiveSessionRow>(&format!(
            "{} WHERE a.user_id = $1 AND a.exam_id = $2 AND a.status = 'in_progress'",
            LIVE_SESSION_SELECT
        ))
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LiveSession::try_from).transpose()
    }

    async fn mark_abandoned(&self, attempt_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE exam_attempts SET status = 'abandoned'
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<LiveSession>, AppError> {
        let row = sqlx::query_as::<_, LiveSessionRow>(&format!(
            "{} WHERE s.id = $1",
            LIVE_SESSION_SELECT
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LiveSession::try_from).transpose()
    }

    async fn save_answer(
        &self,
        session_id: Uuid,
        question_id: i64,
        answer: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // Single-key JSONB merge: writers to other questions never clobber each
        // other, writers to the same question are last-write-wins. The share lock
        // on the attempt row orders this write against a concurrent submit.
        let result = sqlx::query(
            "UPDATE exam_sessions s
             SET answers = s.answers || jsonb_build_object($2::text, $3::text),
                 last_activity_at = $4
             WHERE s.id = $1 AND s.expires_at >= $4
               AND EXISTS (
                   SELECT 1 FROM exam_attempts a
                   WHERE a.id = s.attempt_id AND a.status = 'in_progress'
                   FOR SHARE
               )",
        )
        .bind(session_id)
        .bind(question_id.to_string())
        .bind(answer)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_cursor(
        &self,
        session_id: Uuid,
        section_id: i64,
        question_number: i32,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE exam_sessions s
             SET current_section_id = $2, current_question = $3, last_activity_at = $4
             WHERE s.id = $1 AND s.expires_at >= $4
               AND EXISTS (
                   SELECT 1 FROM exam_attempts a
                   WHERE a.id = s.attempt_id AND a.status = 'in_progress'
                   FOR SHARE
               )",
        )
        .bind(session_id)
        .bind(section_id)
        .bind(question_number)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        attempt_id: i64,
        submitted_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE exam_attempts SET status = 'completed', submitted_at = $2
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(attempt_id)
        .bind(submitted_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM exam_attempts a WHERE a.id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Attempt::try_from).transpose()
    }

    async fn answers_for_attempt(
        &self,
        attempt_id: i64,
    ) -> Result<HashMap<i64, String>, AppError> {
        let answers: Option<Json<HashMap<i64, String>>> =
            sqlx::query_scalar("SELECT answers FROM exam_sessions WHERE attempt_id = $1")
                .bind(attempt_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(answers.map(|a| a.0).unwrap_or_default())
    }

    async fn save_grade(&self, report: &GradeReport) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE exam_attempts
             SET status = 'graded', total_score = $2, max_score = $3,
                 percentage = $4, time_spent_seconds = $5
             WHERE id = $1 AND status = 'completed'",
        )
        .bind(report.attempt_id)
        .bind(report.total_score)
        .bind(report.max_score)
        .bind(report.percentage)
        .bind(report.time_spent_seconds)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if !report.sections.is_empty() {
            let mut sections = QueryBuilder::<Postgres>::new(
                "INSERT INTO section_results
                    (attempt_id, section_id, correct_count, incorrect_count, unanswered_count, score, max_score) ",
            );
            sections.push_values(&report.sections, |mut b, s| {
                b.push_bind(report.attempt_id)
                    .push_bind(s.section_id)
                    .push_bind(s.correct_count)
                    .push_bind(s.incorrect_count)
                    .push_bind(s.unanswered_count)
                    .push_bind(s.score)
                    .push_bind(s.max_score);
            });
            sections.build().execute(&mut *tx).await?;
        }

        if !report.questions.is_empty() {
            let mut questions = QueryBuilder::<Postgres>::new(
                "INSERT INTO question_results
                    (attempt_id, section_id, question_id, submitted_answer, correctness, points_earned, points_possible) ",
            );
            questions.push_values(&report.questions, |mut b, q| {
                b.push_bind(report.attempt_id)
                    .push_bind(q.section_id)
                    .push_bind(q.question_id)
                    .push_bind(q.submitted_answer.clone())
                    .push_bind(q.correctness.as_str())
                    .push_bind(q.points_earned)
                    .push_bind(q.points_possible);
            });
            questions.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn section_results(&self, attempt_id: i64) -> Result<Vec<SectionResult>, AppError> {
        let rows = sqlx::query_as::<_, SectionResultRow>(
            "SELECT r.section_id, r.correct_count, r.incorrect_count, r.unanswered_count,
                    r.score, r.max_score
             FROM section_results r
             JOIN exam_sections s ON s.id = r.section_id
             WHERE r.attempt_id = $1
             ORDER BY s.position",
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SectionResult {
                section_id: r.section_id,
                correct_count: r.correct_count,
                incorrect_count: r.incorrect_count,
                unanswered_count: r.unanswered_count,
                score: r.score,
                max_score: r.max_score,
            })
            .collect())
    }
}

#[derive(FromRow)]
struct ExamRow {
    id: i64,
    title: String,
    is_active: bool,
    estimated_minutes: Option<i32>,
    allow_section_navigation: bool,
}

#[derive(FromRow)]
struct SectionRow {
    id: i64,
    title: String,
    position: i32,
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    section_id: i64,
    position: i32,
    correct_answer: String,
    points: i32,
}

/// Catalog reader over the 'exams', 'exam_sections' and 'exam_questions' tables.
#[derive(Clone)]
pub struct PgExamCatalog {
    pool: PgPool,
}

impl PgExamCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamCatalog for PgExamCatalog {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let Some(exam) = sqlx::query_as::<_, ExamRow>(
            "SELECT id, title, is_active, estimated_minutes, allow_section_navigation
             FROM exams WHERE id = $1",
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let sections = sqlx::query_as::<_, SectionRow>(
            "SELECT id, title, position FROM exam_sections
             WHERE exam_id = $1 ORDER BY position, id",
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let questions = sqlx::query_as::<_, QuestionRow>(
            "SELECT q.id, q.section_id, q.position, q.correct_answer, q.points
             FROM exam_questions q
             JOIN exam_sections s ON s.id = q.section_id
             WHERE s.exam_id = $1
             ORDER BY q.position, q.id",
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_section: HashMap<i64, Vec<ExamQuestion>> = HashMap::new();
        for q in questions {
            by_section.entry(q.section_id).or_default().push(ExamQuestion {
                id: q.id,
                position: q.position,
                correct_answer: q.correct_answer,
                points: q.points,
            });
        }

        Ok(Some(Exam {
            id: exam.id,
            title: exam.title,
            is_active: exam.is_active,
            estimated_minutes: exam.estimated_minutes,
            allow_section_navigation: exam.allow_section_navigation,
            sections: sections
                .into_iter()
                .map(|s| ExamSection {
                    questions: by_section.remove(&s.id).unwrap_or_default(),
                    id: s.id,
                    title: s.title,
                    position: s.position,
                })
                .collect(),
        }))
    }
}

/// License gate over the 'license_grants' table.
///
/// A grant either targets one exam or, with a NULL `exam_id`, every exam.
#[derive(Clone)]
pub struct PgLicenseGate {
    pool: PgPool,
}

impl PgLicenseGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LicenseGate for PgLicenseGate {
    async fn authorize(&self, user_id: i64, exam_id: i64) -> Result<Option<String>, AppError> {
        let key: Option<String> = sqlx::query_scalar(
            "SELECT license_key FROM license_grants
             WHERE user_id = $1
               AND (exam_id = $2 OR exam_id IS NULL)
               AND revoked = FALSE
               AND (expires_at IS NULL OR expires_at > NOW())
             ORDER BY exam_id NULLS LAST
             LIMIT 1",
        )
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        key.map(Some)
            .ok_or_else(|| AppError::AuthError("No valid license for this exam".to_string()))
    }
}

/// Audit log over the 'proctoring_audit_log' table.
#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, event: &AnomalyEvent) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO proctoring_audit_log (session_id, user_id, exam_id, event_type, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.session_id)
        .bind(event.user_id)
        .bind(event.exam_id)
        .bind(event.event_type.as_str())
        .bind(Json(&event.details))
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
