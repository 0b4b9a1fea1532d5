use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::new_id;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => STATUS_ACTIVE,
            Self::Completed => STATUS_COMPLETED,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            STATUS_ACTIVE => Some(Self::Active),
            STATUS_COMPLETED => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One student bound to one course.
///
/// `completed_lessons` keeps completion order but never holds duplicates.
/// `status` is `Completed` exactly when `progress >= 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: String,
    pub student_id: String,
    pub course_id: String,
    pub completed_lessons: Vec<String>,
    pub progress: f64,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(student_id: &str, course_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            enrollment_id: new_id("enr_"),
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
            completed_lessons: Vec::new(),
            progress: 0.0,
            status: EnrollmentStatus::Active,
            enrolled_at: now,
            completed_at: None,
        }
    }

    /// Returns false when the lesson was already recorded.
    pub fn mark_lesson_completed(&mut self, lesson_id: &str) -> bool {
        if self.completed_lessons.iter().any(|l| l == lesson_id) {
            return false;
        }
        self.completed_lessons.push(lesson_id.to_string());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: String,
    pub student_id: String,
    pub course_id: String,
    /// Empty for automatic issuance.
    pub template_id: String,
    /// "system" for automatic issuance, otherwise the issuing admin's id.
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
}

impl Certificate {
    pub fn new(
        student_id: &str,
        course_id: &str,
        template_id: &str,
        issued_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            certificate_id: new_id("cert_"),
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
            template_id: template_id.to_string(),
            issued_by: issued_by.to_string(),
            issued_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: String,
    pub module_id: String,
    pub course_id: String,
    pub title: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub correct_answer: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: String,
    #[serde(default)]
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: String,
    pub course_id: String,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    pub attempts_allowed: i64,
    pub pass_mark: f64,
    pub auto_grade: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub attempt_id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub answers: Vec<QuizAnswer>,
    pub score: f64,
    pub passed: bool,
    pub attempted_at: DateTime<Utc>,
}
