use super::{param_id, require_role, to_json};
use crate::export;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{submit, Role};
use serde_json::json;

fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match submit::list_submissions(conn) {
        Ok(rows) => match to_json(&req.id, &rows) {
            Ok(v) => ok(&req.id, json!({ "submissions": v })),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_submissions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_id(&req.params, "assignmentId") else {
        return err(&req.id, "bad_params", "Invalid submission id.", None);
    };

    match submit::get_submission_detail(conn, assignment_id) {
        Ok(detail) => match to_json(&req.id, &detail) {
            Ok(v) => ok(&req.id, v),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_submissions_unlock(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_id(&req.params, "assignmentId") else {
        return err(&req.id, "bad_params", "Invalid submission id.", None);
    };

    match submit::unlock_submission(conn, assignment_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_submissions_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_id(&req.params, "assignmentId") else {
        return err(&req.id, "bad_params", "Invalid submission id.", None);
    };

    let detail = match submit::get_submission_detail(conn, assignment_id) {
        Ok(d) => d,
        Err(e) => return store_err(&req.id, &e),
    };
    match export::submission_csv(&detail) {
        Ok(csv) => ok(
            &req.id,
            json!({
                "filename": export::submission_filename(&detail),
                "csv": csv
            }),
        ),
        Err(e) => err(&req.id, "export_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.list" => Some(handle_submissions_list(state, req)),
        "submissions.get" => Some(handle_submissions_get(state, req)),
        "submissions.unlock" => Some(handle_submissions_unlock(state, req)),
        "submissions.exportCsv" => Some(handle_submissions_export_csv(state, req)),
        _ => None,
    }
}
