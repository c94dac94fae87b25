use super::{coerce_json_id, param_id, require_role, to_json};
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{assign, templates, Role};
use serde_json::json;

fn handle_templates_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match templates::list_templates(conn) {
        Ok(rows) => match to_json(&req.id, &rows) {
            Ok(v) => ok(&req.id, json!({ "templates": v })),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_templates_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let auth = match require_role(req, Role::Admin) {
        Ok(auth) => auth,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() {
        return err(&req.id, "bad_params", "name required.", None);
    }

    match templates::create_template(conn, name, Some(auth.user_id)) {
        Ok(id) => ok(&req.id, json!({ "templateId": id })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_templates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = param_id(&req.params, "templateId") else {
        return err(&req.id, "bad_params", "Invalid template id.", None);
    };

    match templates::get_template_detail(conn, template_id) {
        Ok(detail) => match to_json(&req.id, &detail) {
            Ok(v) => ok(&req.id, v),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_templates_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = param_id(&req.params, "templateId") else {
        return err(&req.id, "bad_params", "Invalid template id.", None);
    };
    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() {
        return err(&req.id, "bad_params", "name required.", None);
    }

    match templates::update_template(conn, template_id, name) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_templates_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = param_id(&req.params, "templateId") else {
        return err(&req.id, "bad_params", "Invalid template id.", None);
    };

    match templates::delete_template_cascade(conn, template_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_templates_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = param_id(&req.params, "templateId") else {
        return err(&req.id, "bad_params", "Invalid template id.", None);
    };

    match templates::publish_template(conn, template_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_templates_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = param_id(&req.params, "templateId") else {
        return err(&req.id, "bad_params", "Invalid template id.", None);
    };

    let raw_ids = req
        .params
        .get("districtUserIds")
        .and_then(|v| v.as_array());
    let Some(raw_ids) = raw_ids.filter(|a| !a.is_empty()) else {
        return err(&req.id, "bad_params", "districtUserIds required.", None);
    };
    // Non-numeric entries resolve to no user and are skipped, matching
    // the fan-out's treatment of stale ids.
    let ids: Vec<i64> = raw_ids.iter().filter_map(coerce_json_id).collect();

    match assign::assign_template(conn, template_id, &ids) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "templates.list" => Some(handle_templates_list(state, req)),
        "templates.create" => Some(handle_templates_create(state, req)),
        "templates.get" => Some(handle_templates_get(state, req)),
        "templates.update" => Some(handle_templates_update(state, req)),
        "templates.delete" => Some(handle_templates_delete(state, req)),
        "templates.publish" => Some(handle_templates_publish(state, req)),
        "templates.assign" => Some(handle_templates_assign(state, req)),
        _ => None,
    }
}
