use super::{now_iso, templates, StoreError};
use crate::alloc::{self, Entity};
use rusqlite::{Connection, OptionalExtension};

/// Fans a published template out to district users: one assignment per
/// (template, user), one value row per (assignment, field). Safe to
/// re-run after partial failure; a second run converges to the same
/// end state and never disturbs what a district has already entered or
/// sent.
pub fn assign_template(
    conn: &Connection,
    template_id: i64,
    district_user_ids: &[i64],
) -> Result<(), StoreError> {
    let Some(tpl) = templates::get_template(conn, template_id)? else {
        return Err(StoreError::NotFound("Template not found."));
    };
    if !tpl.published {
        return Err(StoreError::InvalidState(
            "Publish the template before assigning.",
        ));
    }

    let field_keys: Vec<String> = {
        let mut stmt = conn.prepare("SELECT field_key FROM fields WHERE template_id = ?")?;
        let keys = stmt
            .query_map([template_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        keys
    };

    let ts = now_iso();

    for &uid in district_user_ids {
        // Stale ids from the admin UI are skipped, not an error.
        let user: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE id = ? AND role = 'district'",
                [uid],
                |r| r.get(0),
            )
            .optional()?;
        if user.is_none() {
            continue;
        }

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM assignments WHERE template_id = ?1 AND district_user_id = ?2",
                (template_id, uid),
                |r| r.get(0),
            )
            .optional()?;

        let assignment_id = match existing {
            // Re-assignment only bumps updated_at. Status and sent_at
            // stay untouched: a sent submission is never pulled back
            // to draft by assigning again.
            Some(id) => {
                conn.execute(
                    "UPDATE assignments SET updated_at = ?1 WHERE id = ?2",
                    (&ts, id),
                )?;
                id
            }
            None => {
                let id = alloc::next_id(conn, Entity::Assignments)?;
                conn.execute(
                    "INSERT INTO assignments(id, template_id, district_user_id, status, sent_at, created_at, updated_at)
                     VALUES(?1, ?2, ?3, 'draft', NULL, ?4, ?4)",
                    (id, template_id, uid, &ts),
                )?;
                id
            }
        };

        for key in &field_keys {
            // Insert-if-absent with the id sentinel; an existing row
            // keeps its value untouched.
            conn.execute(
                "INSERT INTO values_kv(id, assignment_id, field_key, value, updated_at)
                 VALUES(0, ?1, ?2, '', ?3)
                 ON CONFLICT(assignment_id, field_key) DO NOTHING",
                (assignment_id, key, &ts),
            )?;
        }
        backfill_value_ids(conn, assignment_id, &ts)?;
    }

    Ok(())
}

/// Replaces the `id = 0` sentinel on freshly inserted value rows with
/// real allocator ids.
pub(crate) fn backfill_value_ids(
    conn: &Connection,
    assignment_id: i64,
    ts: &str,
) -> Result<(), StoreError> {
    let rowids: Vec<i64> = {
        let mut stmt =
            conn.prepare("SELECT rowid FROM values_kv WHERE assignment_id = ? AND id = 0")?;
        let rowids = stmt
            .query_map([assignment_id], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rowids
    };

    for rowid in rowids {
        let id = alloc::next_id(conn, Entity::Values)?;
        conn.execute(
            "UPDATE values_kv SET id = ?1, updated_at = ?2 WHERE rowid = ?3",
            (id, ts, rowid),
        )?;
    }
    Ok(())
}
