//! First-run provisioning: the admin account and the default district
//! accounts. Existing usernames are never touched, so re-running at
//! every workspace open is safe.

use crate::store::users::{self, NewUser};
use crate::store::Role;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const DEFAULT_DISTRICTS: &[(&str, &str)] = &[
    ("amravati_rural", "अमरावती ग्रामीण / Amravati Rural"),
    ("amravati_city", "अमरावती शहर / Amravati City"),
    ("buldhana", "बुलढाणा / Buldhana"),
    ("washim", "वाशिम / Washim"),
    ("yavatmal", "यवतमाळ / Yavatmal"),
    ("akola", "अकोला / Akola"),
];

/// Salted SHA-256, `sha256$<salt>$<hex>`. Verification happens in the
/// gateway that authenticates requests; the daemon only writes hashes.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    format!("sha256${}${:x}", salt, hasher.finalize())
}

fn ensure_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: Role,
    district_name: Option<&str>,
) -> anyhow::Result<i64> {
    if let Some(existing) = users::get_user_by_username(conn, username)? {
        return Ok(existing.id);
    }
    let id = users::create_user(
        conn,
        &NewUser {
            username,
            password_hash: &hash_password(password),
            role,
            district_name,
        },
    )?;
    Ok(id)
}

pub fn seed_from_env(conn: &Connection) -> anyhow::Result<()> {
    let admin_username = env_non_empty("ADMIN_USERNAME");
    let admin_password = env_non_empty("ADMIN_PASSWORD");
    let district_password = env_non_empty("DISTRICT_DEFAULT_PASSWORD");

    let (Some(admin_username), Some(admin_password), Some(district_password)) =
        (admin_username, admin_password, district_password)
    else {
        log::warn!(
            "seed skipped: missing ADMIN_USERNAME / ADMIN_PASSWORD / DISTRICT_DEFAULT_PASSWORD"
        );
        return Ok(());
    };

    ensure_user(conn, &admin_username, &admin_password, Role::Admin, None)?;
    for &(username, district_name) in DEFAULT_DISTRICTS {
        ensure_user(
            conn,
            username,
            &district_password,
            Role::District,
            Some(district_name),
        )?;
    }
    Ok(())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
