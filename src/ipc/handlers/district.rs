use super::{json_to_string, param_id, require_role, to_json};
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::mailer::{self, Delivery, EmailMessage};
use crate::store::{submit, Role};
use serde_json::json;

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let auth = match require_role(req, Role::District) {
        Ok(auth) => auth,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match submit::list_district_assignments(conn, auth.user_id) {
        Ok(rows) => match to_json(&req.id, &rows) {
            Ok(v) => ok(&req.id, json!({ "assignments": v })),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_assignments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let auth = match require_role(req, Role::District) {
        Ok(auth) => auth,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_id(&req.params, "assignmentId") else {
        return err(&req.id, "bad_params", "Invalid assignment id.", None);
    };

    match submit::get_district_assignment_detail(conn, assignment_id, auth.user_id) {
        Ok(detail) => match to_json(&req.id, &detail) {
            Ok(v) => ok(&req.id, v),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_assignments_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let auth = match require_role(req, Role::District) {
        Ok(auth) => auth,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_id(&req.params, "assignmentId") else {
        return err(&req.id, "bad_params", "Invalid assignment id.", None);
    };
    let Some(items) = req.params.get("values").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "values[] required.", None);
    };

    // Entries without a field key are dropped, not an error.
    let values: Vec<(String, String)> = items
        .iter()
        .filter_map(|item| {
            let key = item.get("fieldKey").and_then(|v| v.as_str())?.trim();
            if key.is_empty() {
                return None;
            }
            let value = item
                .get("value")
                .map(json_to_string)
                .unwrap_or_default();
            Some((key.to_string(), value))
        })
        .collect();

    match submit::save_district_values(conn, assignment_id, auth.user_id, &values) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_assignments_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let auth = match require_role(req, Role::District) {
        Ok(auth) => auth,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assignment_id) = param_id(&req.params, "assignmentId") else {
        return err(&req.id, "bad_params", "Invalid assignment id.", None);
    };

    let outcome = match submit::send_district_submission(conn, assignment_id, auth.user_id) {
        Ok(outcome) => outcome,
        Err(e) => return store_err(&req.id, &e),
    };
    let submission = match to_json(&req.id, &outcome) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // The transition is committed; notification is best-effort and only
    // ever changes the message suffix.
    let message = match state.mailer.admin_email.clone() {
        Some(to) => {
            let msg = EmailMessage {
                to,
                subject: mailer::submission_subject(&outcome),
                html: mailer::build_submission_email_html(&outcome),
            };
            match mailer::send_submission_email(&state.mailer, &msg) {
                Ok(Delivery::Delivered) => "Sent (email delivered)",
                Ok(Delivery::Skipped) => "Sent (email failed; check logs)",
                Err(e) => {
                    log::warn!("email send failed: {}", e);
                    "Sent (email failed; check logs)"
                }
            }
        }
        None => "Sent",
    };

    ok(
        &req.id,
        json!({ "ok": true, "message": message, "submission": submission }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "district.assignments.list" => Some(handle_assignments_list(state, req)),
        "district.assignments.get" => Some(handle_assignments_get(state, req)),
        "district.assignments.save" => Some(handle_assignments_save(state, req)),
        "district.assignments.send" => Some(handle_assignments_send(state, req)),
        _ => None,
    }
}
