// src/services/grading.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{
        attempt::{Attempt, AttemptStatus},
        exam::Exam,
        result::{Correctness, GradeReport, QuestionResult, SectionResult},
    },
    store::{ExamCatalog, SessionRepository},
};

/// Percentage rounded to two decimals; an exam worth nothing scores 0.
pub fn percentage(total_score: i64, max_score: i64) -> f64 {
    if max_score == 0 {
        return 0.0;
    }
    let raw = total_score as f64 / max_score as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Scores recorded answers against the exam's answer key.
///
/// Pure: the caller owns the "grade at most once" guarantee.
/// Answers to questions outside the exam are ignored.
pub fn grade_exam(
    exam: &Exam,
    attempt: &Attempt,
    answers: &HashMap<i64, String>,
) -> Result<GradeReport, AppError> {
    let submitted_at = attempt.submitted_at.ok_or_else(|| {
        AppError::GradingFailure(format!("Attempt {} has no submission time", attempt.id))
    })?;

    let mut sections = Vec::with_capacity(exam.sections.len());
    let mut questions = Vec::new();

    for section in &exam.sections {
        let mut result = SectionResult {
            section_id: section.id,
            correct_count: 0,
            incorrect_count: 0,
            unanswered_count: 0,
            score: 0,
            max_score: 0,
        };

        for question in &section.questions {
            let submitted = answers.get(&question.id);
            let points_possible = i64::from(question.points);

            let correctness = match submitted {
                None => Correctness::Unanswered,
                Some(answer) if *answer == question.correct_answer => Correctness::Correct,
                Some(_) => Correctness::Incorrect,
            };
            let points_earned = match correctness {
                Correctness::Correct => points_possible,
                _ => 0,
            };

            match correctness {
                Correctness::Correct => result.correct_count += 1,
                Correctness::Incorrect => result.incorrect_count += 1,
                Correctness::Unanswered => result.unanswered_count += 1,
            }
            result.score += points_earned;
            result.max_score += points_possible;

            questions.push(QuestionResult {
                section_id: section.id,
                question_id: question.id,
                submitted_answer: submitted.cloned(),
                correctness,
                points_earned,
                points_possible,
            });
        }

        sections.push(result);
    }

    let total_score: i64 = sections.iter().map(|s| s.score).sum();
    let max_score: i64 = sections.iter().map(|s| s.max_score).sum();

    Ok(GradeReport {
        attempt_id: attempt.id,
        total_score,
        max_score,
        percentage: percentage(total_score, max_score),
        time_spent_seconds: (submitted_at - attempt.started_at).num_seconds(),
        sections,
        questions,
    })
}

/// Loads a completed attempt, grades it and persists the breakdown.
pub struct GradingService {
    repo: Arc<dyn SessionRepository>,
    catalog: Arc<dyn ExamCatalog>,
}

impl GradingService {
    pub fn new(repo: Arc<dyn SessionRepository>, catalog: Arc<dyn ExamCatalog>) -> Self {
        Self { repo, catalog }
    }

    /// Grades an attempt sitting in `completed`.
    ///
    /// Safe to re-run after a failure: it only reads persisted answers and the
    /// final write is guarded on the `completed` status.
    pub async fn grade_attempt(&self, attempt_id: i64) -> Result<GradeReport, AppError> {
        let attempt = self
            .repo
            .find_attempt(attempt_id)
            .await
            .map_err(as_grading_failure)?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;

        match attempt.status {
            AttemptStatus::Completed => {}
            AttemptStatus::Graded => {
                return Err(AppError::Conflict("Attempt is already graded".to_string()));
            }
            AttemptStatus::InProgress | AttemptStatus::Abandoned => {
                return Err(AppError::BadRequest(format!(
                    "Attempt is {} and cannot be graded",
                    attempt.status
                )));
            }
        }

        let exam = self
            .catalog
            .find_exam(attempt.exam_id)
            .await
            .map_err(as_grading_failure)?
            .ok_or_else(|| {
                AppError::GradingFailure(format!("Exam {} is missing from the catalog", attempt.exam_id))
            })?;

        let answers = self
            .repo
            .answers_for_attempt(attempt_id)
            .await
            .map_err(as_grading_failure)?;

        let report = grade_exam(&exam, &attempt, &answers)?;

        let stored = self
            .repo
            .save_grade(&report)
            .await
            .map_err(as_grading_failure)?;
        if !stored {
            return Err(AppError::Conflict("Attempt is already graded".to_string()));
        }

        tracing::info!(
            attempt_id,
            total_score = report.total_score,
            max_score = report.max_score,
            percentage = report.percentage,
            "Attempt graded"
        );

        Ok(report)
    }
}

fn as_grading_failure(err: AppError) -> AppError {
    match err {
        AppError::InternalServerError(msg) => AppError::GradingFailure(msg),
        other => other,
    }
}
