// src/models/exam.rs

use serde::{Deserialize, Serialize};

/// Read-only view of an exam as published by the catalog.
///
/// Sections and questions are kept in display order (by `position`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    /// Only active exams accept new attempts.
    pub is_active: bool,
    /// Estimated duration in minutes, if the author declared one.
    pub estimated_minutes: Option<i32>,
    /// When false, candidates work through sections strictly in order.
    pub allow_section_navigation: bool,
    pub sections: Vec<ExamSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSection {
    pub id: i64,
    pub title: String,
    pub position: i32,
    pub questions: Vec<ExamQuestion>,
}

/// One question together with its answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub id: i64,
    pub position: i32,
    /// Canonical answer, compared by exact string equality.
    pub correct_answer: String,
    pub points: i32,
}

impl Exam {
    pub fn first_section(&self) -> Option<&ExamSection> {
        self.sections.iter().min_by_key(|s| s.position)
    }

    pub fn section(&self, section_id: i64) -> Option<&ExamSection> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    pub fn contains_question(&self, question_id: i64) -> bool {
        self.sections
            .iter()
            .flat_map(|s| s.questions.iter())
            .any(|q| q.id == question_id)
    }

    /// The section that follows `section_id` in display order.
    pub fn next_section(&self, section_id: i64) -> Option<&ExamSection> {
        let current = self.section(section_id)?;
        self.sections
            .iter()
            .filter(|s| s.position > current.position)
            .min_by_key(|s| s.position)
    }
}
