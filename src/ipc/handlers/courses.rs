use crate::engine::{self, RefreshSummary};
use crate::ipc::error::{engine_err, err};
use crate::ipc::helpers::{
    now, optional_bool, optional_i64, optional_str, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::store::sqlite::format_ts;
use crate::store::{new_id, SqliteStore};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};

fn db_update_failed(req: &Request, e: rusqlite::Error, table: &str) -> JsonValue {
    err(
        &req.id,
        "db_update_failed",
        e.to_string(),
        Some(json!({ "table": table })),
    )
}

fn db_query_failed(req: &Request, e: rusqlite::Error) -> JsonValue {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

fn not_found(req: &Request, what: &str) -> JsonValue {
    err(&req.id, "not_found", format!("{} not found", what), None)
}

/// Re-run progress for every enrollment of the course after its lesson set
/// changed.
fn refresh(conn: &Connection, req: &Request, course_id: &str) -> Result<RefreshSummary, JsonValue> {
    engine::refresh_course(&SqliteStore::new(conn), course_id, now())
        .map_err(|e| engine_err(&req.id, &e))
}

fn module_course(conn: &Connection, req: &Request, module_id: &str) -> Result<String, JsonValue> {
    conn.query_row(
        "SELECT course_id FROM modules WHERE id = ?",
        [module_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(|e| db_query_failed(req, e))?
    .ok_or_else(|| not_found(req, "module"))
}

fn ensure_course(conn: &Connection, req: &Request, course_id: &str) -> Result<(), JsonValue> {
    let exists = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| db_query_failed(req, e))?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(not_found(req, "course"))
    }
}

fn next_sort_order(
    conn: &Connection,
    req: &Request,
    sql: &str,
    parent_id: &str,
) -> Result<i64, JsonValue> {
    conn.query_row(sql, [parent_id], |r| r.get::<_, i64>(0))
        .map_err(|e| db_query_failed(req, e))
}

fn courses_create(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let title = required_str(req, "title")?;
    let description = optional_str(req, "description")?.unwrap_or_default();
    let certificate_enabled = optional_bool(req, "certificate_enabled", false)?;
    let course_id = new_id("course_");
    let created_at = format_ts(now());

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    tx.execute(
        "INSERT INTO courses(id, title, description, certificate_enabled, created_at)
         VALUES(?, ?, ?, ?, ?)",
        params![course_id, title, description, certificate_enabled as i64, created_at],
    )
    .map_err(|e| db_update_failed(req, e, "courses"))?;

    let mut template_id: Option<String> = None;
    if certificate_enabled {
        let tid = new_id("tmpl_");
        tx.execute(
            "INSERT INTO certificate_templates(id, name, description, course_id, created_at)
             VALUES(?, ?, ?, ?, ?)",
            params![
                tid,
                format!("{} Certificate", title),
                format!("Certificate of completion for {}", title),
                course_id,
                created_at
            ],
        )
        .map_err(|e| db_update_failed(req, e, "certificate_templates"))?;
        template_id = Some(tid);
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;

    Ok(json!({
        "course_id": course_id,
        "title": title,
        "description": description,
        "certificate_enabled": certificate_enabled,
        "template_id": template_id,
        "created_at": created_at,
    }))
}

fn courses_list(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.title, c.description, c.certificate_enabled, c.created_at,
                    (SELECT COUNT(*) FROM modules m WHERE m.course_id = c.id),
                    (SELECT COUNT(*) FROM lessons l WHERE l.course_id = c.id)
             FROM courses c
             ORDER BY c.created_at, c.id",
        )
        .map_err(|e| db_query_failed(req, e))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "course_id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "certificate_enabled": r.get::<_, i64>(3)? != 0,
                "created_at": r.get::<_, String>(4)?,
                "module_count": r.get::<_, i64>(5)?,
                "total_lessons": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_query_failed(req, e))?;
    Ok(json!({ "courses": rows }))
}

fn courses_delete(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let course_id = required_str(req, "course_id")?;
    ensure_course(conn, req, &course_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    tx.execute(
        "DELETE FROM quiz_attempts WHERE quiz_id IN (SELECT id FROM quizzes WHERE course_id = ?)",
        [&course_id],
    )
    .map_err(|e| db_update_failed(req, e, "quiz_attempts"))?;
    tx.execute("DELETE FROM quizzes WHERE course_id = ?", [&course_id])
        .map_err(|e| db_update_failed(req, e, "quizzes"))?;
    let lessons_deleted = tx
        .execute("DELETE FROM lessons WHERE course_id = ?", [&course_id])
        .map_err(|e| db_update_failed(req, e, "lessons"))?;
    tx.execute("DELETE FROM modules WHERE course_id = ?", [&course_id])
        .map_err(|e| db_update_failed(req, e, "modules"))?;
    tx.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(|e| db_update_failed(req, e, "courses"))?;
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;

    tracing::info!(course_id = %course_id, lessons_deleted, "course deleted");
    Ok(json!({ "course_id": course_id, "lessons_deleted": lessons_deleted }))
}

fn modules_create(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let course_id = required_str(req, "course_id")?;
    let title = required_str(req, "title")?;
    ensure_course(conn, req, &course_id)?;
    let sort_order = match optional_i64(req, "order")? {
        Some(v) => v,
        None => next_sort_order(
            conn,
            req,
            "SELECT COUNT(*) + 1 FROM modules WHERE course_id = ?",
            &course_id,
        )?,
    };
    let module_id = new_id("mod_");
    conn.execute(
        "INSERT INTO modules(id, course_id, title, sort_order) VALUES(?, ?, ?, ?)",
        params![module_id, course_id, title, sort_order],
    )
    .map_err(|e| db_update_failed(req, e, "modules"))?;
    Ok(json!({
        "module_id": module_id,
        "course_id": course_id,
        "title": title,
        "sort_order": sort_order,
    }))
}

fn modules_delete(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let module_id = required_str(req, "module_id")?;
    let course_id = module_course(conn, req, &module_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    let lessons_deleted = tx
        .execute("DELETE FROM lessons WHERE module_id = ?", [&module_id])
        .map_err(|e| db_update_failed(req, e, "lessons"))?;
    tx.execute("DELETE FROM modules WHERE id = ?", [&module_id])
        .map_err(|e| db_update_failed(req, e, "modules"))?;
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;

    let summary = refresh(conn, req, &course_id)?;
    Ok(json!({
        "module_id": module_id,
        "course_id": course_id,
        "lessons_deleted": lessons_deleted,
        "refresh": summary,
    }))
}

fn lessons_create(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let module_id = required_str(req, "module_id")?;
    let title = required_str(req, "title")?;
    let course_id = module_course(conn, req, &module_id)?;
    let sort_order = match optional_i64(req, "order")? {
        Some(v) => v,
        None => next_sort_order(
            conn,
            req,
            "SELECT COUNT(*) + 1 FROM lessons WHERE module_id = ?",
            &module_id,
        )?,
    };
    let lesson_id = new_id("les_");
    conn.execute(
        "INSERT INTO lessons(id, module_id, course_id, title, sort_order) VALUES(?, ?, ?, ?, ?)",
        params![lesson_id, module_id, course_id, title, sort_order],
    )
    .map_err(|e| db_update_failed(req, e, "lessons"))?;

    let summary = refresh(conn, req, &course_id)?;
    Ok(json!({
        "lesson_id": lesson_id,
        "module_id": module_id,
        "course_id": course_id,
        "title": title,
        "sort_order": sort_order,
        "refresh": summary,
    }))
}

fn lessons_update(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let lesson_id = required_str(req, "lesson_id")?;
    let title = optional_str(req, "title")?;
    let new_module = optional_str(req, "module_id")?;
    let sort_order = optional_i64(req, "order")?;

    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT module_id, course_id FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| db_query_failed(req, e))?;
    let Some((old_module, old_course)) = current else {
        return Err(not_found(req, "lesson"));
    };
    let (module_id, course_id) = match new_module {
        Some(m) if m != old_module => {
            let c = module_course(conn, req, &m)?;
            (m, c)
        }
        _ => (old_module, old_course.clone()),
    };

    conn.execute(
        "UPDATE lessons
         SET module_id = ?, course_id = ?,
             title = COALESCE(?, title),
             sort_order = COALESCE(?, sort_order)
         WHERE id = ?",
        params![module_id, course_id, title, sort_order, lesson_id],
    )
    .map_err(|e| db_update_failed(req, e, "lessons"))?;

    // Moving a lesson across courses changes lesson existence in both.
    let mut refreshed = vec![refresh(conn, req, &course_id)?];
    if course_id != old_course {
        refreshed.push(refresh(conn, req, &old_course)?);
    }
    Ok(json!({
        "lesson_id": lesson_id,
        "module_id": module_id,
        "course_id": course_id,
        "refresh": refreshed,
    }))
}

fn lessons_delete(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let lesson_id = required_str(req, "lesson_id")?;
    let course_id: Option<String> = conn
        .query_row(
            "SELECT course_id FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_query_failed(req, e))?;
    let Some(course_id) = course_id else {
        return Err(not_found(req, "lesson"));
    };
    conn.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id])
        .map_err(|e| db_update_failed(req, e, "lessons"))?;

    let summary = refresh(conn, req, &course_id)?;
    Ok(json!({
        "lesson_id": lesson_id,
        "course_id": course_id,
        "refresh": summary,
    }))
}

fn lessons_complete(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let student_id = required_str(req, "student_id")?;
    let lesson_id = required_str(req, "lesson_id")?;
    let enrollment =
        engine::complete_lesson(&SqliteStore::new(conn), &student_id, &lesson_id, now())
            .map_err(|e| engine_err(&req.id, &e))?;
    serde_json::to_value(enrollment).map_err(|e| err(&req.id, "internal", e.to_string(), None))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let f: HandlerFn = match req.method.as_str() {
        "courses.create" => courses_create,
        "courses.list" => courses_list,
        "courses.delete" => courses_delete,
        "modules.create" => modules_create,
        "modules.delete" => modules_delete,
        "lessons.create" => lessons_create,
        "lessons.update" => lessons_update,
        "lessons.delete" => lessons_delete,
        "lessons.complete" => lessons_complete,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
