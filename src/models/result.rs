// src/models/result.rs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Tri-state outcome of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Correctness {
    Correct,
    Incorrect,
    Unanswered,
}

impl Correctness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Correctness::Correct => "correct",
            Correctness::Incorrect => "incorrect",
            Correctness::Unanswered => "unanswered",
        }
    }
}

/// Represents the 'question_results' table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuestionResult {
    pub section_id: i64,
    pub question_id: i64,
    pub submitted_answer: Option<String>,
    pub correctness: Correctness,
    pub points_earned: i64,
    pub points_possible: i64,
}

/// Represents the 'section_results' table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SectionResult {
    pub section_id: i64,
    pub correct_count: i32,
    pub incorrect_count: i32,
    pub unanswered_count: i32,
    pub score: i64,
    pub max_score: i64,
}

/// Full breakdown produced by grading one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeReport {
    pub attempt_id: i64,
    pub sections: Vec<SectionResult>,
    pub questions: Vec<QuestionResult>,
    pub total_score: i64,
    pub max_score: i64,
    pub percentage: f64,
    pub time_spent_seconds: i64,
}
