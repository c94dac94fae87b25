use super::{json_to_string, param_id, require_role};
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::fields::{self, FieldPatch};
use crate::store::{templates, Role, StoreError};
use serde_json::json;

fn handle_fields_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(template_id) = param_id(&req.params, "templateId") else {
        return err(&req.id, "bad_params", "Invalid template id.", None);
    };
    let label = req
        .params
        .get("label")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if label.is_empty() {
        return err(&req.id, "bad_params", "label required.", None);
    }
    let field_type = req.params.get("type").and_then(|v| v.as_str());
    let required = req
        .params
        .get("required")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match templates::get_template(conn, template_id) {
        Ok(Some(_)) => {}
        Ok(None) => return store_err(&req.id, &StoreError::NotFound("Template not found.")),
        Err(e) => return store_err(&req.id, &e),
    }

    match fields::add_field(conn, template_id, label, field_type, required) {
        Ok(id) => ok(&req.id, json!({ "fieldId": id })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_fields_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(field_id) = param_id(&req.params, "fieldId") else {
        return err(&req.id, "bad_params", "Invalid field id.", None);
    };

    let patch = FieldPatch {
        label: req
            .params
            .get("label")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        field_type: req
            .params
            .get("type")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        required: req.params.get("required").and_then(|v| v.as_bool()),
        // Anything that is not an array clears the options.
        options: req.params.get("options").map(|v| {
            v.as_array()
                .map(|items| items.iter().map(json_to_string).collect())
                .unwrap_or_default()
        }),
    };

    match fields::update_field(conn, field_id, &patch) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_fields_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(field_id) = param_id(&req.params, "fieldId") else {
        return err(&req.id, "bad_params", "Invalid field id.", None);
    };

    match fields::delete_field(conn, field_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fields.add" => Some(handle_fields_add(state, req)),
        "fields.update" => Some(handle_fields_update(state, req)),
        "fields.delete" => Some(handle_fields_delete(state, req)),
        _ => None,
    }
}
