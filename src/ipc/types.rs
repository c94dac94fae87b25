use std::path::PathBuf;

use crate::mailer::MailerConfig;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Identity established by the gateway in front of this daemon.
    /// The daemon asserts roles against it; it never authenticates.
    #[serde(default)]
    pub auth: Option<AuthCtx>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthCtx {
    pub user_id: i64,
    pub role: String,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub mailer: MailerConfig,
}
