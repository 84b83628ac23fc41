use crate::db;
use crate::error::GradebookError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, with_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Opens (creating if needed) the workspace store and swaps it into `state`.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            warn!(workspace = %path.display(), error = %e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn| {
        let key = required_str(&req.params, "key")?;
        let value = db::settings_get_json(conn, &key)?;
        Ok(json!({ "key": key, "value": value }))
    })
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn| {
        let key = required_str(&req.params, "key")?;
        if key.trim().is_empty() {
            return Err(GradebookError::bad_params("key must not be empty"));
        }
        let value = req.params.get("value").cloned().unwrap_or(serde_json::Value::Null);
        db::settings_set_json(conn, &key, &value)?;
        Ok(json!({ "key": key, "value": value }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
