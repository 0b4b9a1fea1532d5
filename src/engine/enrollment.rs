use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::store::{ContentRepository, Enrollment, EnrollmentStore};

/// Course ids touched by a reconciliation, for audit and notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub kept: Vec<String>,
}

fn require_student(student_id: &str) -> EngineResult<()> {
    if student_id.trim().is_empty() {
        return Err(EngineError::BadInput("student_id must not be empty".into()));
    }
    Ok(())
}

/// Self-enrollment. A pair can only be enrolled once.
pub fn enroll_student<S>(
    store: &S,
    student_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Enrollment>
where
    S: ContentRepository + EnrollmentStore + ?Sized,
{
    require_student(student_id)?;
    if !store.course_exists(course_id)? {
        return Err(EngineError::not_found("course", course_id));
    }
    if store.find_enrollment(student_id, course_id)?.is_some() {
        return Err(EngineError::AlreadyEnrolled {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
        });
    }
    let enrollment = Enrollment::new(student_id, course_id, now);
    store.upsert_enrollment(&enrollment)?;
    tracing::info!(student_id, course_id, enrollment_id = %enrollment.enrollment_id, "student enrolled");
    Ok(enrollment)
}

/// Delete an enrollment and its completion history, returning the record as
/// it was before deletion.
pub fn unenroll<S>(store: &S, enrollment_id: &str) -> EngineResult<Enrollment>
where
    S: EnrollmentStore + ?Sized,
{
    let Some(existing) = store.get_enrollment(enrollment_id)? else {
        return Err(EngineError::not_found("enrollment", enrollment_id));
    };
    if !store.delete_enrollment(enrollment_id)? {
        return Err(EngineError::not_found("enrollment", enrollment_id));
    }
    tracing::info!(
        enrollment_id,
        student_id = %existing.student_id,
        course_id = %existing.course_id,
        "enrollment deleted"
    );
    Ok(existing)
}

/// Split the student's current enrollments against the desired course ids.
///
/// Returns `(to_add, to_remove, to_keep)`. Duplicate desired ids collapse to
/// their first occurrence; order follows `desired` for additions and the
/// current records for removals and keeps.
pub fn plan<'a>(
    current: &'a [Enrollment],
    desired: &[String],
) -> (Vec<String>, Vec<&'a Enrollment>, Vec<&'a Enrollment>) {
    let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();
    let current_set: HashSet<&str> = current.iter().map(|e| e.course_id.as_str()).collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let to_add = desired
        .iter()
        .filter(|c| !current_set.contains(c.as_str()))
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect();
    let (to_keep, to_remove): (Vec<&Enrollment>, Vec<&Enrollment>) = current
        .iter()
        .partition(|e| desired_set.contains(e.course_id.as_str()));
    (to_add, to_remove, to_keep)
}

/// Make the student's enrollments match `desired` exactly.
///
/// New enrollments start empty; removed ones are deleted outright; kept ones
/// are not written. Unknown course ids among the additions fail the call
/// before anything is written.
pub fn reconcile_enrollments<S>(
    store: &S,
    student_id: &str,
    desired: &[String],
    now: DateTime<Utc>,
) -> EngineResult<ReconcileDiff>
where
    S: ContentRepository + EnrollmentStore + ?Sized,
{
    require_student(student_id)?;
    let current = store.student_enrollments(student_id)?;
    let (to_add, to_remove, to_keep) = plan(&current, desired);

    for course_id in &to_add {
        if !store.course_exists(course_id)? {
            return Err(EngineError::not_found("course", course_id.as_str()));
        }
    }

    let mut diff = ReconcileDiff {
        kept: to_keep.iter().map(|e| e.course_id.clone()).collect(),
        ..ReconcileDiff::default()
    };
    for course_id in to_add {
        store.upsert_enrollment(&Enrollment::new(student_id, &course_id, now))?;
        diff.added.push(course_id);
    }
    for e in to_remove {
        if store.delete_enrollment(&e.enrollment_id)? {
            diff.removed.push(e.course_id.clone());
        }
    }

    tracing::info!(
        student_id,
        added = diff.added.len(),
        removed = diff.removed.len(),
        kept = diff.kept.len(),
        "enrollments reconciled"
    );
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn store_with_courses(courses: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for c in courses {
            store.add_course(c);
        }
        store
    }

    fn enrolled_courses(store: &MemoryStore, student: &str) -> Vec<String> {
        let mut v: Vec<String> = store
            .find_enrollments(Some(student), None)
            .unwrap()
            .into_iter()
            .map(|e| e.course_id)
            .collect();
        v.sort();
        v
    }

    #[test]
    fn diff_adds_missing_removes_extra_and_keeps_history() {
        let store = store_with_courses(&["A", "B", "C"]);
        enroll_student(&store, "s1", "A", t(0)).unwrap();
        let mut b = enroll_student(&store, "s1", "B", t(0)).unwrap();
        b.completed_lessons = ids(&["b1"]);
        b.progress = 50.0;
        store.upsert_enrollment(&b).unwrap();

        let diff = reconcile_enrollments(&store, "s1", &ids(&["B", "C"]), t(1)).unwrap();
        assert_eq!(diff.added, ids(&["C"]));
        assert_eq!(diff.removed, ids(&["A"]));
        assert_eq!(diff.kept, ids(&["B"]));
        assert_eq!(enrolled_courses(&store, "s1"), ids(&["B", "C"]));

        let kept = store.find_enrollment("s1", "B").unwrap().unwrap();
        assert_eq!(kept, b);
        let added = store.find_enrollment("s1", "C").unwrap().unwrap();
        assert_eq!(added.progress, 0.0);
        assert!(added.completed_lessons.is_empty());
    }

    #[test]
    fn empty_target_unenrolls_everything() {
        let store = store_with_courses(&["A", "B"]);
        enroll_student(&store, "s1", "A", t(0)).unwrap();
        enroll_student(&store, "s1", "B", t(0)).unwrap();
        enroll_student(&store, "s2", "A", t(0)).unwrap();

        let diff = reconcile_enrollments(&store, "s1", &[], t(1)).unwrap();
        assert_eq!(diff.removed.len(), 2);
        assert!(diff.added.is_empty());
        assert!(enrolled_courses(&store, "s1").is_empty());
        assert_eq!(enrolled_courses(&store, "s2"), ids(&["A"]));
    }

    #[test]
    fn reconciling_twice_changes_nothing_the_second_time() {
        let store = store_with_courses(&["A", "B"]);
        let target = ids(&["A", "B", "A"]);
        let first = reconcile_enrollments(&store, "s1", &target, t(1)).unwrap();
        assert_eq!(first.added, ids(&["A", "B"]));

        let before = store.all_enrollments();
        let second = reconcile_enrollments(&store, "s1", &target, t(2)).unwrap();
        assert!(second.added.is_empty() && second.removed.is_empty());
        assert_eq!(store.all_enrollments(), before);
    }

    #[test]
    fn unknown_course_fails_before_any_write() {
        let store = store_with_courses(&["A", "B"]);
        enroll_student(&store, "s1", "A", t(0)).unwrap();
        let err = reconcile_enrollments(&store, "s1", &ids(&["B", "ghost"]), t(1)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "course", .. }));
        assert_eq!(enrolled_courses(&store, "s1"), ids(&["A"]));
    }

    #[test]
    fn self_enroll_rejects_duplicates_and_unknown_courses() {
        let store = store_with_courses(&["A"]);
        enroll_student(&store, "s1", "A", t(0)).unwrap();
        assert!(matches!(
            enroll_student(&store, "s1", "A", t(1)),
            Err(EngineError::AlreadyEnrolled { .. })
        ));
        assert!(matches!(
            enroll_student(&store, "s1", "Z", t(1)),
            Err(EngineError::NotFound { kind: "course", .. })
        ));
    }

    #[test]
    fn blank_student_is_rejected() {
        let store = store_with_courses(&["A"]);
        assert!(matches!(
            reconcile_enrollments(&store, " ", &ids(&["A"]), t(0)),
            Err(EngineError::BadInput(_))
        ));
        assert!(store.all_enrollments().is_empty());
    }

    #[test]
    fn unenroll_missing_record_is_not_found() {
        let store = store_with_courses(&["A"]);
        let e = enroll_student(&store, "s1", "A", t(0)).unwrap();
        let removed = unenroll(&store, &e.enrollment_id).unwrap();
        assert_eq!(removed, e);
        assert!(matches!(
            unenroll(&store, &e.enrollment_id),
            Err(EngineError::NotFound { .. })
        ));
    }
}
