use serde_json::json;

use crate::error::EngineError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn engine_err(id: &str, e: &EngineError) -> serde_json::Value {
    let details = match e {
        EngineError::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
        EngineError::AlreadyEnrolled {
            student_id,
            course_id,
        } => Some(json!({ "student_id": student_id, "course_id": course_id })),
        EngineError::MaxAttempts { allowed } => Some(json!({ "attempts_allowed": allowed })),
        _ => None,
    };
    if matches!(e, EngineError::Store(_) | EngineError::Corrupt { .. }) {
        tracing::error!(error = %e, "store failure");
    }
    err(id, e.code(), e.to_string(), details)
}
