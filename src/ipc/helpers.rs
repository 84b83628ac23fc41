use rusqlite::Connection;
use serde_json::json;

use crate::error::{GradebookError, Result};
use crate::invalidation::{invalidated_by, Entity};
use crate::ipc::error::{err, from_error, ok};
use crate::ipc::types::{AppState, Request};

/// Runs `f` against the open workspace store and wraps the outcome in a
/// response envelope.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection) -> Result<serde_json::Value>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, f(conn))
}

pub fn respond(req: &Request, result: Result<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => from_error(&req.id, &e),
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GradebookError::bad_params(format!("missing {}", key)))
}

/// Required free text; surrounding whitespace is dropped and blank is refused.
pub fn required_text(params: &serde_json::Value, key: &str) -> Result<String> {
    let v = required_str(params, key)?;
    let t = v.trim();
    if t.is_empty() {
        return Err(GradebookError::bad_params(format!("{} must not be empty", key)));
    }
    Ok(t.to_string())
}

pub fn optional_text(params: &serde_json::Value, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => required_text(params, key).map(Some),
    }
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64> {
    let v = params
        .get(key)
        .ok_or_else(|| GradebookError::bad_params(format!("missing {}", key)))?;
    if let Some(n) = v.as_i64() {
        return Ok(n);
    }
    v.as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| GradebookError::bad_params(format!("{} must be an integer", key)))
}

/// Raw keystroke-style input: strings pass through, numbers are rendered
/// back to text so the domain parser sees one representation.
pub fn input_string(params: &serde_json::Value, key: &str) -> Result<String> {
    match params.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_json::Value::Null) | None => {
            Err(GradebookError::bad_params(format!("missing {}", key)))
        }
        Some(_) => Err(GradebookError::bad_params(format!(
            "{} must be a string or number",
            key
        ))),
    }
}

/// Adds the stale-view list for `entity` to a mutation result.
pub fn mutated(entity: Entity, mut result: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = result.as_object_mut() {
        obj.insert("invalidates".into(), json!(invalidated_by(entity)));
    }
    result
}
