use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::parse_params;
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceSelectParams {
    path: String,
}

fn handle_health(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn handle_workspace_select(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p: WorkspaceSelectParams = parse_params(req)?;
    if p.path.trim().is_empty() {
        return Err(HandlerErr::bad_params("path must not be empty"));
    }
    let path = PathBuf::from(p.path.trim());

    let conn = db::open_db(&path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    log::info!("workspace opened at {}", path.to_string_lossy());
    // Replacing the connection closes the previous workspace.
    state.db = Some(conn);
    state.workspace = Some(path.clone());
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
