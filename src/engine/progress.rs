use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calc::progress_percent;
use crate::error::{EngineError, EngineResult};
use crate::store::{ContentRepository, Enrollment, EnrollmentStatus, EnrollmentStore};

#[derive(Debug, Clone, PartialEq)]
pub enum Recalculation {
    /// Progress was recomputed (and persisted if anything changed).
    Recalculated { enrollment: Enrollment, changed: bool },
    /// The course has no lessons; the enrollment was left as stored.
    NoLessons(Enrollment),
}

impl Recalculation {
    pub fn enrollment(&self) -> &Enrollment {
        match self {
            Self::Recalculated { enrollment, .. } => enrollment,
            Self::NoLessons(e) => e,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Self::Recalculated { changed: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub course_id: String,
    pub total_lessons: usize,
    pub enrollments: usize,
    pub updated: usize,
    /// True when the course had no lessons and nothing was touched.
    pub skipped: bool,
}

/// Recompute one enrollment against the lessons that currently exist in its
/// course.
///
/// Completed ids that are no longer in `course_lessons` are dropped. Status
/// follows progress: reaching 100 stamps `completed_at`, falling below 100
/// demotes to active and clears it. Returns `None` when the course has no
/// lessons, since there is no denominator.
pub fn recalculate(
    enrollment: &Enrollment,
    course_lessons: &HashSet<String>,
    now: DateTime<Utc>,
) -> Option<Enrollment> {
    let completed_lessons: Vec<String> = enrollment
        .completed_lessons
        .iter()
        .filter(|id| course_lessons.contains(id.as_str()))
        .cloned()
        .collect();
    let progress = progress_percent(completed_lessons.len(), course_lessons.len())?;

    let mut next = enrollment.clone();
    next.completed_lessons = completed_lessons;
    next.progress = progress;
    if progress < 100.0 {
        if next.status == EnrollmentStatus::Completed {
            next.status = EnrollmentStatus::Active;
        }
        next.completed_at = None;
    } else if next.status != EnrollmentStatus::Completed {
        next.status = EnrollmentStatus::Completed;
        next.completed_at = Some(now);
    } else if next.completed_at.is_none() {
        next.completed_at = Some(now);
    }
    Some(next)
}

fn apply<S>(
    store: &S,
    enrollment: Enrollment,
    course_lessons: &HashSet<String>,
    now: DateTime<Utc>,
) -> EngineResult<Recalculation>
where
    S: EnrollmentStore + ?Sized,
{
    let Some(next) = recalculate(&enrollment, course_lessons, now) else {
        return Ok(Recalculation::NoLessons(enrollment));
    };
    let changed = next != enrollment;
    if changed {
        store.upsert_enrollment(&next)?;
        tracing::debug!(
            enrollment_id = %next.enrollment_id,
            progress = next.progress,
            status = next.status.as_str(),
            "enrollment recalculated"
        );
    }
    Ok(Recalculation::Recalculated {
        enrollment: next,
        changed,
    })
}

/// Recalculate the enrollment of `student_id` in `course_id`.
pub fn recalculate_for<S>(
    store: &S,
    student_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Recalculation>
where
    S: ContentRepository + EnrollmentStore + ?Sized,
{
    let enrollment = store
        .find_enrollment(student_id, course_id)?
        .ok_or_else(|| EngineError::not_found("enrollment", format!("{}/{}", student_id, course_id)))?;
    let lessons = store.lesson_ids_of(course_id)?;
    apply(store, enrollment, &lessons, now)
}

/// Re-run the recalculation over every enrollment of a course.
///
/// Each enrollment is written independently; an error stops the pass and
/// leaves the remaining enrollments stale until their next recalculation.
pub fn refresh_course<S>(
    store: &S,
    course_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<RefreshSummary>
where
    S: ContentRepository + EnrollmentStore + ?Sized,
{
    let lessons = store.lesson_ids_of(course_id)?;
    if lessons.is_empty() {
        tracing::info!(course_id, "course has no lessons, progress left frozen");
        return Ok(RefreshSummary {
            course_id: course_id.to_string(),
            total_lessons: 0,
            enrollments: 0,
            updated: 0,
            skipped: true,
        });
    }

    let enrollments = store.find_enrollments(None, Some(course_id))?;
    let total = enrollments.len();
    let mut updated = 0;
    for e in enrollments {
        if apply(store, e, &lessons, now)?.changed() {
            updated += 1;
        }
    }
    tracing::info!(
        course_id,
        total_lessons = lessons.len(),
        enrollments = total,
        updated,
        "course progress refreshed"
    );
    Ok(RefreshSummary {
        course_id: course_id.to_string(),
        total_lessons: lessons.len(),
        enrollments: total,
        updated,
        skipped: false,
    })
}

/// Record a lesson as completed for the student and recalculate that
/// enrollment. Completing a lesson twice only recalculates.
pub fn complete_lesson<S>(
    store: &S,
    student_id: &str,
    lesson_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Enrollment>
where
    S: ContentRepository + EnrollmentStore + ?Sized,
{
    let lesson = store
        .lesson(lesson_id)?
        .ok_or_else(|| EngineError::not_found("lesson", lesson_id))?;
    let mut enrollment = store
        .find_enrollment(student_id, &lesson.course_id)?
        .ok_or_else(|| {
            EngineError::not_found("enrollment", format!("{}/{}", student_id, lesson.course_id))
        })?;

    let stored = enrollment.clone();
    let newly_completed = enrollment.mark_lesson_completed(lesson_id);
    let lessons = store.lesson_ids_of(&lesson.course_id)?;
    let next = recalculate(&enrollment, &lessons, now).unwrap_or(enrollment);
    // Completion set and progress land in the same write.
    if next != stored {
        store.upsert_enrollment(&next)?;
    }
    tracing::info!(
        student_id,
        lesson_id,
        newly_completed,
        progress = next.progress,
        "lesson completed"
    );
    Ok(next)
}
