use crate::engine::{self, Eligibility};
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err};
use crate::ipc::helpers::{now, optional_str, required_str, with_db, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::store::sqlite::format_ts;
use crate::store::{new_id, ContentRepository, SqliteStore};
use rusqlite::{params, Connection};
use serde_json::{json, Value as JsonValue};

fn to_json<T: serde::Serialize>(req: &Request, v: T) -> Result<JsonValue, JsonValue> {
    serde_json::to_value(v).map_err(|e| err(&req.id, "internal", e.to_string(), None))
}

fn certificates_check(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = required_str(req, "student_id")?;
    let course_id = required_str(req, "course_id")?;
    let outcome = engine::check_certificate(&SqliteStore::new(conn), &student_id, &course_id, now())
        .map_err(|e| engine_err(&req.id, &e))?;
    match outcome {
        Eligibility::NotEnrolled => Ok(json!({
            "eligible": false,
            "issued": false,
            "reason": "not enrolled",
        })),
        Eligibility::Evaluated(report) => to_json(req, report),
    }
}

fn certificates_list(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = optional_str(req, "student_id")?;
    let certificates = SqliteStore::new(conn)
        .list_certificates(student_id.as_deref())
        .map_err(|e| engine_err(&req.id, &e))?;
    Ok(json!({ "certificates": to_json(req, certificates)? }))
}

fn certificates_issue(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = required_str(req, "student_id")?;
    let course_id = required_str(req, "course_id")?;
    let issued_by = required_str(req, "issued_by")?;
    let template_id = optional_str(req, "template_id")?;

    let store = SqliteStore::new(conn);
    let fail = |e: EngineError| engine_err(&req.id, &e);
    if !store.course_exists(&course_id).map_err(fail)? {
        return Err(fail(EngineError::not_found("course", course_id.as_str())));
    }
    if let Some(tid) = template_id.as_deref() {
        if !store.template_exists(tid).map_err(fail)? {
            return Err(fail(EngineError::not_found("template", tid)));
        }
    }

    let issuance = engine::issue_once(
        &store,
        &student_id,
        &course_id,
        template_id.as_deref().unwrap_or(""),
        &issued_by,
        now(),
    )
    .map_err(fail)?;
    Ok(json!({
        "certificate": to_json(req, issuance.certificate)?,
        "created": issuance.created,
    }))
}

fn templates_create(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let name = required_str(req, "name")?;
    let course_id = optional_str(req, "course_id")?;
    let description = optional_str(req, "description")?.unwrap_or_default();

    if let Some(cid) = course_id.as_deref() {
        let store = SqliteStore::new(conn);
        if !store
            .course_exists(cid)
            .map_err(|e| engine_err(&req.id, &e))?
        {
            return Err(engine_err(&req.id, &EngineError::not_found("course", cid)));
        }
    }

    let template_id = new_id("tmpl_");
    let created_at = format_ts(now());
    conn.execute(
        "INSERT INTO certificate_templates(id, name, description, course_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        params![
            template_id,
            name,
            description,
            course_id.as_deref().unwrap_or(""),
            created_at
        ],
    )
    .map_err(|e| {
        err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "certificate_templates" })),
        )
    })?;
    Ok(json!({
        "template_id": template_id,
        "name": name,
        "description": description,
        "course_id": course_id,
        "created_at": created_at,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let f: HandlerFn = match req.method.as_str() {
        "certificates.check" => certificates_check,
        "certificates.list" => certificates_list,
        "certificates.issue" => certificates_issue,
        "certificates.templates.create" => templates_create,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
