pub mod core;
pub mod district;
pub mod fields;
pub mod submissions;
pub mod templates;
pub mod users;

use super::error::err;
use super::types::{AuthCtx, Request};
use crate::store::Role;

/// Asserts the request carries the expected role. The gateway already
/// authenticated the caller; this is the precondition check, not a
/// re-derivation.
pub(crate) fn require_role<'a>(
    req: &'a Request,
    role: Role,
) -> Result<&'a AuthCtx, serde_json::Value> {
    let Some(auth) = req.auth.as_ref() else {
        return Err(err(&req.id, "not_authenticated", "Not authenticated.", None));
    };
    if auth.role != role.as_str() {
        return Err(err(&req.id, "forbidden", "Forbidden.", None));
    }
    Ok(auth)
}

/// Ids arrive from assorted clients as numbers or numeric strings;
/// anything else is rejected by the caller as bad params.
pub(crate) fn param_id(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(coerce_json_id)
}

pub(crate) fn coerce_json_id(v: &serde_json::Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        return (f.fract() == 0.0).then(|| f as i64);
    }
    v.as_str().and_then(|s| s.trim().parse().ok())
}

/// Saved values are stored as strings whatever the client sent.
pub(crate) fn json_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn to_json<T: serde::Serialize>(
    id: &str,
    value: &T,
) -> Result<serde_json::Value, serde_json::Value> {
    serde_json::to_value(value).map_err(|e| err(id, "internal_error", e.to_string(), None))
}
