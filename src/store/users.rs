use super::{is_unique_violation, Role, StoreError};
use crate::alloc::{self, Entity};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub district_name: Option<String>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub district_name: Option<&'a str>,
}

pub fn create_user(conn: &Connection, user: &NewUser) -> Result<i64, StoreError> {
    let id = alloc::next_id(conn, Entity::Users)?;
    let res = conn.execute(
        "INSERT INTO users(id, username, password_hash, role, district_name)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        (
            id,
            user.username,
            user.password_hash,
            user.role.as_str(),
            user.district_name,
        ),
    );
    match res {
        Ok(_) => Ok(id),
        Err(e) if is_unique_violation(&e) => {
            Err(StoreError::Validation("Username already exists.".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_user_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<UserRow>, StoreError> {
    conn.query_row(
        "SELECT id, username, role, district_name FROM users WHERE username = ?",
        [username],
        |r| {
            Ok(UserRow {
                id: r.get(0)?,
                username: r.get(1)?,
                role: r.get(2)?,
                district_name: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_users(conn: &Connection, role: Option<Role>) -> Result<Vec<UserRow>, StoreError> {
    let map = |r: &rusqlite::Row<'_>| {
        Ok(UserRow {
            id: r.get(0)?,
            username: r.get(1)?,
            role: r.get(2)?,
            district_name: r.get(3)?,
        })
    };

    let rows = match role {
        Some(role) => {
            let mut stmt = conn.prepare(
                "SELECT id, username, role, district_name FROM users
                 WHERE role = ? ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map([role.as_str()], map)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, username, role, district_name FROM users ORDER BY id DESC",
            )?;
            let rows = stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}
