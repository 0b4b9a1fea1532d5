use crate::calc::grade_answers;
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err};
use crate::ipc::helpers::{
    now, optional_bool, optional_f64_range, optional_i64, required_str, with_db, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::store::models::{QuizAnswer, QuizAttempt, QuizQuestion};
use crate::store::{new_id, ContentRepository, SqliteStore};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

pub const DEFAULT_ATTEMPTS_ALLOWED: i64 = 3;
pub const DEFAULT_PASS_MARK: f64 = 70.0;

fn required_list<T: DeserializeOwned>(req: &Request, key: &str) -> Result<Vec<T>, JsonValue> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    if !raw.is_array() {
        return Err(err(&req.id, "bad_params", format!("{} must be array", key), None));
    }
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid {}: {}", key, e),
            None,
        )
    })
}

fn quizzes_create(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let course_id = required_str(req, "course_id")?;
    let title = required_str(req, "title")?;
    let questions: Vec<QuizQuestion> = required_list(req, "questions")?;
    let attempts_allowed = optional_i64(req, "attempts_allowed")?.unwrap_or(DEFAULT_ATTEMPTS_ALLOWED);
    if attempts_allowed < 1 {
        return Err(err(
            &req.id,
            "bad_params",
            "attempts_allowed must be at least 1",
            None,
        ));
    }
    let pass_mark = optional_f64_range(req, "pass_mark", 0.0, 100.0)?.unwrap_or(DEFAULT_PASS_MARK);
    let auto_grade = optional_bool(req, "auto_grade", true)?;

    let store = SqliteStore::new(conn);
    if !store
        .course_exists(&course_id)
        .map_err(|e| engine_err(&req.id, &e))?
    {
        return Err(engine_err(
            &req.id,
            &EngineError::not_found("course", course_id),
        ));
    }

    let quiz_id = new_id("quiz_");
    let questions_json = serde_json::to_string(&questions)
        .map_err(|e| err(&req.id, "internal", e.to_string(), None))?;
    conn.execute(
        "INSERT INTO quizzes(id, course_id, title, questions_json, attempts_allowed, pass_mark, auto_grade)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![
            quiz_id,
            course_id,
            title,
            questions_json,
            attempts_allowed,
            pass_mark,
            auto_grade as i64
        ],
    )
    .map_err(|e| {
        err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "quizzes" })),
        )
    })?;

    Ok(json!({
        "quiz_id": quiz_id,
        "course_id": course_id,
        "title": title,
        "question_count": questions.len(),
        "attempts_allowed": attempts_allowed,
        "pass_mark": pass_mark,
        "auto_grade": auto_grade,
    }))
}

fn quizzes_delete(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let quiz_id = required_str(req, "quiz_id")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    let attempts_deleted = tx
        .execute("DELETE FROM quiz_attempts WHERE quiz_id = ?", [&quiz_id])
        .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    let n = tx
        .execute("DELETE FROM quizzes WHERE id = ?", [&quiz_id])
        .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    if n == 0 {
        return Err(engine_err(&req.id, &EngineError::not_found("quiz", quiz_id)));
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))?;
    Ok(json!({ "quiz_id": quiz_id, "attempts_deleted": attempts_deleted }))
}

fn quizzes_attempt(conn: &Connection, req: &Request) -> Result<JsonValue, JsonValue> {
    let quiz_id = required_str(req, "quiz_id")?;
    let student_id = required_str(req, "student_id")?;
    let answers: Vec<QuizAnswer> = required_list(req, "answers")?;

    let store = SqliteStore::new(conn);
    let fail = |e: EngineError| engine_err(&req.id, &e);
    let quiz = store
        .quiz(&quiz_id)
        .map_err(fail)?
        .ok_or_else(|| fail(EngineError::not_found("quiz", quiz_id.as_str())))?;

    let used = store.attempt_count(&quiz_id, &student_id).map_err(fail)?;
    if used >= quiz.attempts_allowed {
        tracing::info!(quiz_id = %quiz_id, student_id = %student_id, used, "attempt limit reached");
        return Err(fail(EngineError::MaxAttempts {
            allowed: quiz.attempts_allowed,
        }));
    }

    let score = if quiz.auto_grade {
        grade_answers(&quiz.questions, &answers)
    } else {
        0.0
    };
    let attempt = QuizAttempt {
        attempt_id: new_id("att_"),
        quiz_id: quiz.quiz_id.clone(),
        student_id,
        answers,
        score,
        passed: score >= quiz.pass_mark,
        attempted_at: now(),
    };
    store.insert_attempt(&attempt).map_err(fail)?;
    tracing::debug!(quiz_id = %attempt.quiz_id, score, passed = attempt.passed, "quiz attempt recorded");

    Ok(json!({
        "attempt_id": attempt.attempt_id,
        "quiz_id": attempt.quiz_id,
        "student_id": attempt.student_id,
        "score": attempt.score,
        "passed": attempt.passed,
        "attempt_number": used + 1,
        "attempts_remaining": quiz.attempts_allowed - used - 1,
        "pending_manual_grading": !quiz.auto_grade,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    let f: HandlerFn = match req.method.as_str() {
        "quizzes.create" => quizzes_create,
        "quizzes.delete" => quizzes_delete,
        "quizzes.attempt" => quizzes_attempt,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
