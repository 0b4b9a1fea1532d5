//! Collaborator interfaces the engine reads and writes through.
//!
//! The engine never touches a connection directly; `SqliteStore` backs the
//! sidecar and `MemoryStore` backs the unit tests.

use std::collections::HashSet;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::error::EngineResult;

#[cfg(test)]
pub mod memory;
pub mod models;
pub mod sqlite;

pub use models::{Certificate, Enrollment, EnrollmentStatus, Lesson, Quiz};
pub use sqlite::SqliteStore;

pub trait ContentRepository {
    fn course_exists(&self, course_id: &str) -> EngineResult<bool>;
    fn lesson_count(&self, course_id: &str) -> EngineResult<usize>;
    /// Ids of every lesson currently in the course.
    fn lesson_ids_of(&self, course_id: &str) -> EngineResult<HashSet<String>>;
    fn lesson(&self, lesson_id: &str) -> EngineResult<Option<Lesson>>;
    fn quizzes_of(&self, course_id: &str) -> EngineResult<Vec<Quiz>>;
}

pub trait EnrollmentStore {
    fn find_enrollments(
        &self,
        student_id: Option<&str>,
        course_id: Option<&str>,
    ) -> EngineResult<Vec<Enrollment>>;
    fn get_enrollment(&self, enrollment_id: &str) -> EngineResult<Option<Enrollment>>;
    /// Writes the whole record in one statement.
    fn upsert_enrollment(&self, enrollment: &Enrollment) -> EngineResult<()>;
    /// Returns false when nothing was deleted.
    fn delete_enrollment(&self, enrollment_id: &str) -> EngineResult<bool>;

    fn find_enrollment(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> EngineResult<Option<Enrollment>> {
        Ok(self
            .find_enrollments(Some(student_id), Some(course_id))?
            .into_iter()
            .next())
    }

    /// Every enrollment of the student. Unlike `find_enrollments`, a record
    /// that cannot be read is an error rather than skipped, since callers
    /// rewrite the student's whole set from this.
    fn student_enrollments(&self, student_id: &str) -> EngineResult<Vec<Enrollment>> {
        self.find_enrollments(Some(student_id), None)
    }
}

pub trait CertificateStore {
    fn find_certificate(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> EngineResult<Option<Certificate>>;
    /// Must not create a second certificate for an already-certified pair.
    fn insert_certificate(&self, certificate: &Certificate) -> EngineResult<()>;
}

pub trait QuizAttemptStore {
    fn best_score(&self, quiz_id: &str, student_id: &str) -> EngineResult<Option<f64>>;
}

/// Current time at the millisecond precision timestamps are stored with, so a
/// record handed back to the caller equals the one read back later.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Short prefixed id, e.g. `enr_3f9a0c1b2d4e`.
pub fn new_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &hex[..12])
}
