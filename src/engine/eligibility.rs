use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calc::mean_score;
use crate::error::EngineResult;
use crate::store::{
    Certificate, CertificateStore, ContentRepository, EnrollmentStore, QuizAttemptStore,
};

/// Minimum average of best quiz scores for a certificate.
pub const QUIZ_PASS_THRESHOLD: f64 = 60.0;

/// Average reported when the student has no quiz attempts in the course.
pub const NO_ATTEMPTS_AVERAGE: f64 = 100.0;

pub const SYSTEM_ISSUER: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibilityReport {
    pub eligible: bool,
    /// True when a certificate exists after the check, new or not.
    pub issued: bool,
    /// True only when this call created the certificate.
    pub newly_issued: bool,
    pub lessons_completed: usize,
    pub total_lessons: usize,
    pub all_lessons_done: bool,
    pub avg_quiz_score: f64,
    pub certificate: Option<Certificate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    NotEnrolled,
    Evaluated(EligibilityReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issuance {
    pub certificate: Certificate,
    pub created: bool,
}

/// Lesson and quiz verdict for one pair.
///
/// `lessons_completed` is the stored completed-set size; it is not
/// re-filtered against lesson existence here.
pub fn evaluate(
    lessons_completed: usize,
    total_lessons: usize,
    best_scores: &[f64],
) -> (bool, f64, bool) {
    let all_lessons_done = total_lessons > 0 && lessons_completed >= total_lessons;
    let avg_quiz_score = mean_score(best_scores).unwrap_or(NO_ATTEMPTS_AVERAGE);
    let eligible = all_lessons_done && avg_quiz_score >= QUIZ_PASS_THRESHOLD;
    (all_lessons_done, avg_quiz_score, eligible)
}

/// Issue a certificate for the pair unless one already exists.
///
/// The store refuses a second certificate per pair, so when two callers race
/// the one that lost gets the winner's record back with `created == false`.
pub fn issue_once<S>(
    store: &S,
    student_id: &str,
    course_id: &str,
    template_id: &str,
    issued_by: &str,
    now: DateTime<Utc>,
) -> EngineResult<Issuance>
where
    S: CertificateStore + ?Sized,
{
    if let Some(existing) = store.find_certificate(student_id, course_id)? {
        return Ok(Issuance {
            certificate: existing,
            created: false,
        });
    }
    let candidate = Certificate::new(student_id, course_id, template_id, issued_by, now);
    store.insert_certificate(&candidate)?;
    let stored = store
        .find_certificate(student_id, course_id)?
        .unwrap_or_else(|| candidate.clone());
    let created = stored.certificate_id == candidate.certificate_id;
    if created {
        tracing::info!(
            student_id,
            course_id,
            certificate_id = %stored.certificate_id,
            issued_by,
            "certificate issued"
        );
    }
    Ok(Issuance {
        certificate: stored,
        created,
    })
}

/// Decide certificate eligibility for the pair and issue automatically when
/// eligible. Safe to call repeatedly: it never issues twice.
pub fn check_certificate<S>(
    store: &S,
    student_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Eligibility>
where
    S: ContentRepository + EnrollmentStore + CertificateStore + QuizAttemptStore + ?Sized,
{
    let Some(enrollment) = store.find_enrollment(student_id, course_id)? else {
        tracing::debug!(student_id, course_id, "eligibility check for non-enrolled pair");
        return Ok(Eligibility::NotEnrolled);
    };

    let total_lessons = store.lesson_count(course_id)?;
    let lessons_completed = enrollment.completed_lessons.len();

    let mut best_scores = Vec::new();
    for quiz in store.quizzes_of(course_id)? {
        if let Some(score) = store.best_score(&quiz.quiz_id, student_id)? {
            best_scores.push(score);
        }
    }
    let (all_lessons_done, avg_quiz_score, eligible) =
        evaluate(lessons_completed, total_lessons, &best_scores);

    let (certificate, newly_issued) = if eligible {
        let issuance = issue_once(store, student_id, course_id, "", SYSTEM_ISSUER, now)?;
        (Some(issuance.certificate), issuance.created)
    } else {
        (store.find_certificate(student_id, course_id)?, false)
    };

    Ok(Eligibility::Evaluated(EligibilityReport {
        eligible,
        issued: certificate.is_some(),
        newly_issued,
        lessons_completed,
        total_lessons,
        all_lessons_done,
        avg_quiz_score,
        certificate,
    }))
}
