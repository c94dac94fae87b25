use super::{require_role, to_json};
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::seed;
use crate::store::users::{self, NewUser};
use crate::store::Role;
use serde_json::json;

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        None => None,
        Some(s) => match Role::parse(s) {
            Some(r) => Some(r),
            // Unknown role filter matches nothing.
            None => return ok(&req.id, json!({ "users": [] })),
        },
    };

    match users::list_users(conn, role) {
        Ok(rows) => match to_json(&req.id, &rows) {
            Ok(v) => ok(&req.id, json!({ "users": v })),
            Err(resp) => resp,
        },
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(req, Role::Admin) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = req
        .params
        .get("username")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return err(&req.id, "bad_params", "username and password required.", None);
    }

    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        None => Role::District,
        Some(s) => match Role::parse(s) {
            Some(r) => r,
            None => return err(&req.id, "bad_params", "Invalid role.", None),
        },
    };
    let district_name = req
        .params
        .get("districtName")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let new_user = NewUser {
        username,
        password_hash: &seed::hash_password(password),
        role,
        district_name,
    };
    match users::create_user(conn, &new_user) {
        Ok(id) => ok(&req.id, json!({ "userId": id })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        _ => None,
    }
}
