use rusqlite::Connection;
use serde_json::Value as JsonValue;

use super::error::err;
use super::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, JsonValue> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{} must be string or null", key),
                    None,
                )
            })?;
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

pub fn optional_bool(req: &Request, key: &str, default: bool) -> Result<bool, JsonValue> {
    match req.params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be boolean", key), None)),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, JsonValue> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be integer or null", key),
                None,
            )
        }),
    }
}

pub fn optional_f64_range(
    req: &Request,
    key: &str,
    min: f64,
    max: f64,
) -> Result<Option<f64>, JsonValue> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let n = v.as_f64().ok_or_else(|| {
                err(&req.id, "bad_params", format!("{} must be a number", key), None)
            })?;
            if !(min..=max).contains(&n) {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be in {}..={}", key, min, max),
                    None,
                ));
            }
            Ok(Some(n))
        }
    }
}

/// Trimmed, de-duplicated list of ids. An empty array is valid.
pub fn required_id_array(req: &Request, key: &str) -> Result<Vec<String>, JsonValue> {
    let bad = || {
        err(
            &req.id,
            "bad_params",
            format!("{} must be array of strings", key),
            None,
        )
    };
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    let arr = raw.as_array().ok_or_else(bad)?;
    let mut out: Vec<String> = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item.as_str().ok_or_else(bad)?.trim().to_string();
        if s.is_empty() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must not contain blank ids", key),
                None,
            ));
        }
        if !out.contains(&s) {
            out.push(s);
        }
    }
    Ok(out)
}

pub use crate::store::now;

/// Handler body over the open workspace; `Err` carries a ready error response.
pub type HandlerFn = fn(&Connection, &Request) -> Result<JsonValue, JsonValue>;

pub fn with_db(state: &AppState, req: &Request, f: HandlerFn) -> JsonValue {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match f(conn, req) {
        Ok(result) => super::error::ok(&req.id, result),
        Err(resp) => resp,
    }
}
