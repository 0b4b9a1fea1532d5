use std::collections::HashMap;

use crate::engine::{self, Recalculation};
use crate::ipc::error::{engine_err, err};
use crate::ipc::helpers::{
    now, optional_str, required_id_array, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{ContentRepository, Enrollment, EnrollmentStore, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};

fn enrollment_json(req: &Request, e: &Enrollment) -> Result<JsonValue, JsonValue> {
    serde_json::to_value(e).map_err(|e| err(&req.id, "internal", e.to_string(), None))
}

fn enrollments_create(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = required_str(req, "student_id")?;
    let course_id = required_str(req, "course_id")?;
    let enrollment =
        engine::enroll_student(&SqliteStore::new(conn), &student_id, &course_id, now())
            .map_err(|e| engine_err(&req.id, &e))?;
    enrollment_json(req, &enrollment)
}

fn enrollments_list(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = optional_str(req, "student_id")?;
    let course_id = optional_str(req, "course_id")?;
    let store = SqliteStore::new(conn);
    let enrollments = store
        .find_enrollments(student_id.as_deref(), course_id.as_deref())
        .map_err(|e| engine_err(&req.id, &e))?;

    let mut totals: HashMap<String, usize> = HashMap::new();
    let mut rows = Vec::with_capacity(enrollments.len());
    for e in &enrollments {
        let total = match totals.get(&e.course_id) {
            Some(n) => *n,
            None => {
                let n = store
                    .lesson_count(&e.course_id)
                    .map_err(|err| engine_err(&req.id, &err))?;
                totals.insert(e.course_id.clone(), n);
                n
            }
        };
        let mut row = enrollment_json(req, e)?;
        row["total_lessons"] = json!(total);
        rows.push(row);
    }
    Ok(json!({ "enrollments": rows }))
}

fn enrollments_delete(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let enrollment_id = required_str(req, "enrollment_id")?;
    let removed = engine::unenroll(&SqliteStore::new(conn), &enrollment_id)
        .map_err(|e| engine_err(&req.id, &e))?;
    Ok(json!({
        "enrollment_id": removed.enrollment_id,
        "student_id": removed.student_id,
        "course_id": removed.course_id,
        "deleted": true,
    }))
}

fn enrollments_recalculate(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = required_str(req, "student_id")?;
    let course_id = required_str(req, "course_id")?;
    let outcome = engine::recalculate_for(&SqliteStore::new(conn), &student_id, &course_id, now())
        .map_err(|e| engine_err(&req.id, &e))?;
    let outcome_name = match &outcome {
        Recalculation::Recalculated { .. } => "recalculated",
        Recalculation::NoLessons(_) => "no_lessons",
    };
    let mut result = enrollment_json(req, outcome.enrollment())?;
    result["outcome"] = json!(outcome_name);
    result["changed"] = json!(outcome.changed());
    Ok(result)
}

fn enrollments_reconcile(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = required_str(req, "student_id")?;
    let course_ids = required_id_array(req, "course_ids")?;
    let diff = engine::reconcile_enrollments(
        &SqliteStore::new(conn),
        &student_id,
        &course_ids,
        now(),
    )
    .map_err(|e| engine_err(&req.id, &e))?;
    Ok(json!({
        "student_id": student_id,
        "added": diff.added,
        "removed": diff.removed,
        "kept": diff.kept,
    }))
}

fn progress_refresh(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let course_id = required_str(req, "course_id")?;
    let summary = engine::refresh_course(&SqliteStore::new(conn), &course_id, now())
        .map_err(|e| engine_err(&req.id, &e))?;
    serde_json::to_value(summary).map_err(|e| err(&req.id, "internal", e.to_string(), None))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let f: HandlerFn = match req.method.as_str() {
        "enrollments.create" => enrollments_create,
        "enrollments.list" => enrollments_list,
        "enrollments.delete" => enrollments_delete,
        "enrollments.recalculate" => enrollments_recalculate,
        "enrollments.reconcile" => enrollments_reconcile,
        "progress.refresh" => progress_refresh,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
