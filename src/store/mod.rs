//! Typed CRUD over the five entity collections. Every creation path
//! goes through the allocator; every read path tolerates legacy rows.
//!
//! Functions take a plain `&Connection` and return `StoreError`, which
//! carries the error taxonomy the request boundary needs: absence and
//! not-owned-by-caller are deliberately the same `NotFound` so a
//! district probing another district's ids learns nothing.

pub mod assign;
pub mod fields;
pub mod submit;
pub mod templates;
pub mod users;

use crate::alloc::AllocError;
use chrono::{SecondsFormat, Utc};
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    NotFound(&'static str),
    InvalidState(&'static str),
    Validation(String),
    Allocator(String),
    Db(rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::InvalidState(_) => "invalid_state",
            StoreError::Validation(_) => "validation_failed",
            StoreError::Allocator(_) => "allocator_failed",
            StoreError::Db(_) => "db_failed",
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(m) | StoreError::InvalidState(m) => write!(f, "{}", m),
            StoreError::Validation(m) | StoreError::Allocator(m) => write!(f, "{}", m),
            StoreError::Db(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e)
    }
}

impl From<AllocError> for StoreError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::Db(e) => StoreError::Db(e),
            corrupted => StoreError::Allocator(corrupted.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    District,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::District => "district",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "district" => Some(Role::District),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Select,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
        }
    }

    pub fn parse(s: &str) -> Option<FieldType> {
        match s {
            "text" => Some(FieldType::Text),
            "textarea" => Some(FieldType::Textarea),
            "number" => Some(FieldType::Number),
            "date" => Some(FieldType::Date),
            "select" => Some(FieldType::Select),
            _ => None,
        }
    }

    /// Unknown types degrade to `text` rather than failing the write.
    pub fn parse_or_text(s: &str) -> FieldType {
        FieldType::parse(s).unwrap_or(FieldType::Text)
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
