use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::{alloc, db, seed};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
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

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };

    // Counters and ids must be trustworthy before anything allocates.
    let repaired = match alloc::repair_all(&conn) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "allocator_failed", e.to_string(), None),
    };
    if repaired > 0 {
        log::info!("startup repair re-keyed {} documents", repaired);
    }

    // Seeding is best-effort; it must not block opening the workspace.
    if let Err(e) = seed::seed_from_env(&conn) {
        log::warn!("seed failed: {e:?}");
    }

    state.workspace = Some(path.clone());
    state.db = Some(conn);
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "repairedDocuments": repaired
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
