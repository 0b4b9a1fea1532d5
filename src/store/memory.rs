use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};

use super::models::{Certificate, Enrollment, Lesson, Quiz};
use super::{CertificateStore, ContentRepository, EnrollmentStore, QuizAttemptStore};
use crate::error::EngineResult;

/// In-memory collaborators for engine tests.
#[derive(Default)]
pub struct MemoryStore {
    courses: RefCell<HashSet<String>>,
    lessons: RefCell<BTreeMap<String, Lesson>>,
    quizzes: RefCell<Vec<Quiz>>,
    // (quiz_id, student_id, score)
    attempts: RefCell<Vec<(String, String, f64)>>,
    enrollments: RefCell<BTreeMap<String, Enrollment>>,
    certificates: RefCell<Vec<Certificate>>,
    enrollment_writes: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_course(&self, course_id: &str) {
        self.courses.borrow_mut().insert(course_id.to_string());
    }

    pub fn add_lesson(&self, course_id: &str, lesson_id: &str) {
        self.add_course(course_id);
        let sort_order = self.lessons.borrow().len() as i64;
        self.lessons.borrow_mut().insert(
            lesson_id.to_string(),
            Lesson {
                lesson_id: lesson_id.to_string(),
                module_id: format!("mod_{}", course_id),
                course_id: course_id.to_string(),
                title: lesson_id.to_string(),
                sort_order,
            },
        );
    }

    pub fn remove_lesson(&self, lesson_id: &str) {
        self.lessons.borrow_mut().remove(lesson_id);
    }

    pub fn add_quiz(&self, course_id: &str, quiz_id: &str) {
        self.quizzes.borrow_mut().push(Quiz {
            quiz_id: quiz_id.to_string(),
            course_id: course_id.to_string(),
            title: quiz_id.to_string(),
            questions: Vec::new(),
            attempts_allowed: 3,
            pass_mark: 70.0,
            auto_grade: true,
        });
    }

    pub fn add_attempt(&self, quiz_id: &str, student_id: &str, score: f64) {
        self.attempts
            .borrow_mut()
            .push((quiz_id.to_string(), student_id.to_string(), score));
    }

    pub fn certificate_count(&self, student_id: &str, course_id: &str) -> usize {
        self.certificates
            .borrow()
            .iter()
            .filter(|c| c.student_id == student_id && c.course_id == course_id)
            .count()
    }

    /// Number of `upsert_enrollment` calls so far.
    pub fn write_count(&self) -> usize {
        self.enrollment_writes.get()
    }

    pub fn all_enrollments(&self) -> Vec<Enrollment> {
        self.enrollments.borrow().values().cloned().collect()
    }
}

impl ContentRepository for MemoryStore {
    fn course_exists(&self, course_id: &str) -> EngineResult<bool> {
        Ok(self.courses.borrow().contains(course_id))
    }

    fn lesson_count(&self, course_id: &str) -> EngineResult<usize> {
        Ok(self
            .lessons
            .borrow()
            .values()
            .filter(|l| l.course_id == course_id)
            .count())
    }

    fn lesson_ids_of(&self, course_id: &str) -> EngineResult<HashSet<String>> {
        Ok(self
            .lessons
            .borrow()
            .values()
            .filter(|l| l.course_id == course_id)
            .map(|l| l.lesson_id.clone())
            .collect())
    }

    fn lesson(&self, lesson_id: &str) -> EngineResult<Option<Lesson>> {
        Ok(self.lessons.borrow().get(lesson_id).cloned())
    }

    fn quizzes_of(&self, course_id: &str) -> EngineResult<Vec<Quiz>> {
        Ok(self
            .quizzes
            .borrow()
            .iter()
            .filter(|q| q.course_id == course_id)
            .cloned()
            .collect())
    }
}

impl EnrollmentStore for MemoryStore {
    fn find_enrollments(
        &self,
        student_id: Option<&str>,
        course_id: Option<&str>,
    ) -> EngineResult<Vec<Enrollment>> {
        Ok(self
            .enrollments
            .borrow()
            .values()
            .filter(|e| student_id.map_or(true, |s| e.student_id == s))
            .filter(|e| course_id.map_or(true, |c| e.course_id == c))
            .cloned()
            .collect())
    }

    fn get_enrollment(&self, enrollment_id: &str) -> EngineResult<Option<Enrollment>> {
        Ok(self.enrollments.borrow().get(enrollment_id).cloned())
    }

    fn upsert_enrollment(&self, enrollment: &Enrollment) -> EngineResult<()> {
        self.enrollment_writes.set(self.enrollment_writes.get() + 1);
        self.enrollments
            .borrow_mut()
            .insert(enrollment.enrollment_id.clone(), enrollment.clone());
        Ok(())
    }

    fn delete_enrollment(&self, enrollment_id: &str) -> EngineResult<bool> {
        Ok(self.enrollments.borrow_mut().remove(enrollment_id).is_some())
    }
}

impl CertificateStore for MemoryStore {
    fn find_certificate(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> EngineResult<Option<Certificate>> {
        Ok(self
            .certificates
            .borrow()
            .iter()
            .find(|c| c.student_id == student_id && c.course_id == course_id)
            .cloned())
    }

    fn insert_certificate(&self, certificate: &Certificate) -> EngineResult<()> {
        if self
            .find_certificate(&certificate.student_id, &certificate.course_id)?
            .is_none()
        {
            self.certificates.borrow_mut().push(certificate.clone());
        }
        Ok(())
    }
}

impl QuizAttemptStore for MemoryStore {
    fn best_score(&self, quiz_id: &str, student_id: &str) -> EngineResult<Option<f64>> {
        Ok(self
            .attempts
            .borrow()
            .iter()
            .filter(|(q, s, _)| q == quiz_id && s == student_id)
            .map(|(_, _, score)| *score)
            .fold(None, |best: Option<f64>, s| {
                Some(best.map_or(s, |b| b.max(s)))
            }))
    }
}
