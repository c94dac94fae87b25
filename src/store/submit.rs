use super::assign::backfill_value_ids;
use super::fields::{field_row_from_sql, FieldRow, FIELD_COLUMNS};
use super::{now_iso, StoreError};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub id: i64,
    pub status: String,
    pub sent_at: Option<String>,
    pub updated_at: String,
    pub template_name: String,
    pub district_username: String,
    pub district_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRow {
    pub field_key: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDetail {
    pub id: i64,
    pub status: String,
    pub sent_at: Option<String>,
    pub updated_at: String,
    pub template_name: String,
    pub district_name: String,
    pub values: Vec<SubmissionRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictAssignmentSummary {
    pub id: i64,
    pub status: String,
    pub sent_at: Option<String>,
    pub updated_at: String,
    pub template_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuePair {
    pub field_key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictAssignmentDetail {
    pub id: i64,
    pub template_name: String,
    pub status: String,
    pub sent_at: Option<String>,
    pub updated_at: String,
    pub fields: Vec<FieldRow>,
    pub values: Vec<ValuePair>,
}

/// Payload handed to the notification sink after a successful send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub district_name: String,
    pub template_name: String,
    pub sent_at: String,
    pub rows: Vec<LabelValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelValue {
    pub label: String,
    pub value: String,
}

struct AssignmentHead {
    id: i64,
    template_id: i64,
    district_user_id: i64,
    status: String,
    sent_at: Option<String>,
    updated_at: String,
}

fn get_assignment(
    conn: &Connection,
    assignment_id: i64,
    district_user_id: Option<i64>,
) -> Result<Option<AssignmentHead>, StoreError> {
    let map = |r: &rusqlite::Row<'_>| {
        Ok(AssignmentHead {
            id: r.get(0)?,
            template_id: r.get(1)?,
            district_user_id: r.get(2)?,
            status: r.get(3)?,
            sent_at: r.get(4)?,
            updated_at: r.get(5)?,
        })
    };
    let head = match district_user_id {
        Some(uid) => conn
            .query_row(
                "SELECT id, template_id, district_user_id, status, sent_at, updated_at
                 FROM assignments WHERE id = ?1 AND district_user_id = ?2",
                (assignment_id, uid),
                map,
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT id, template_id, district_user_id, status, sent_at, updated_at
                 FROM assignments WHERE id = ?",
                [assignment_id],
                map,
            )
            .optional()?,
    };
    Ok(head)
}

fn template_name(conn: &Connection, template_id: i64) -> Result<String, StoreError> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM templates WHERE id = ?",
            [template_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(name.unwrap_or_default())
}

fn district_display_name(conn: &Connection, user_id: i64) -> Result<String, StoreError> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT username, district_name FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row
        .map(|(username, district)| district.unwrap_or(username))
        .unwrap_or_default())
}

fn value_map(conn: &Connection, assignment_id: i64) -> Result<HashMap<String, String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT field_key, value FROM values_kv WHERE assignment_id = ?")?;
    let map = stmt
        .query_map([assignment_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<HashMap<String, String>, _>>()?;
    Ok(map)
}

fn ordered_fields(conn: &Connection, template_id: i64) -> Result<Vec<FieldRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM fields WHERE template_id = ? ORDER BY order_index, id",
        FIELD_COLUMNS
    ))?;
    let fields = stmt
        .query_map([template_id], field_row_from_sql)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fields)
}

/// Admin overview of every assignment, newest activity first.
/// Assignments whose template or user vanished mid-cascade are
/// filtered out by the joins rather than surfaced half-populated.
pub fn list_submissions(conn: &Connection) -> Result<Vec<SubmissionSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.status, a.sent_at, a.updated_at, t.name, u.username,
                COALESCE(u.district_name, u.username)
         FROM assignments a
         JOIN templates t ON t.id = a.template_id
         JOIN users u ON u.id = a.district_user_id
         ORDER BY a.updated_at DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SubmissionSummary {
                id: r.get(0)?,
                status: r.get(1)?,
                sent_at: r.get(2)?,
                updated_at: r.get(3)?,
                template_name: r.get(4)?,
                district_username: r.get(5)?,
                district_name: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_submission_detail(
    conn: &Connection,
    assignment_id: i64,
) -> Result<SubmissionDetail, StoreError> {
    let Some(a) = get_assignment(conn, assignment_id, None)? else {
        return Err(StoreError::NotFound("Submission not found."));
    };

    let fields = ordered_fields(conn, a.template_id)?;
    let vmap = value_map(conn, a.id)?;

    Ok(SubmissionDetail {
        id: a.id,
        status: a.status,
        sent_at: a.sent_at,
        updated_at: a.updated_at,
        template_name: template_name(conn, a.template_id)?,
        district_name: district_display_name(conn, a.district_user_id)?,
        values: fields
            .into_iter()
            .map(|f| SubmissionRow {
                value: vmap.get(&f.field_key).cloned().unwrap_or_default(),
                field_key: f.field_key,
                label: f.label,
            })
            .collect(),
    })
}

/// Admin reset back to draft. Unconditional and idempotent; unlocking
/// an assignment already in draft changes nothing but updated_at.
pub fn unlock_submission(conn: &Connection, assignment_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE assignments SET status = 'draft', sent_at = NULL, updated_at = ?1 WHERE id = ?2",
        (now_iso(), assignment_id),
    )?;
    Ok(())
}

pub fn list_district_assignments(
    conn: &Connection,
    district_user_id: i64,
) -> Result<Vec<DistrictAssignmentSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.status, a.sent_at, a.updated_at, t.name
         FROM assignments a
         JOIN templates t ON t.id = a.template_id
         WHERE a.district_user_id = ?
         ORDER BY a.updated_at DESC",
    )?;
    let rows = stmt
        .query_map([district_user_id], |r| {
            Ok(DistrictAssignmentSummary {
                id: r.get(0)?,
                status: r.get(1)?,
                sent_at: r.get(2)?,
                updated_at: r.get(3)?,
                template_name: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// District view of one assignment. Another district's assignment id
/// reads as not-found, indistinguishable from an absent one.
pub fn get_district_assignment_detail(
    conn: &Connection,
    assignment_id: i64,
    district_user_id: i64,
) -> Result<DistrictAssignmentDetail, StoreError> {
    let Some(a) = get_assignment(conn, assignment_id, Some(district_user_id))? else {
        return Err(StoreError::NotFound("Assignment not found."));
    };

    let fields = ordered_fields(conn, a.template_id)?;
    let values = {
        let mut stmt =
            conn.prepare("SELECT field_key, value FROM values_kv WHERE assignment_id = ?")?;
        let values = stmt
            .query_map([a.id], |r| {
                Ok(ValuePair {
                    field_key: r.get(0)?,
                    value: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        values
    };

    Ok(DistrictAssignmentDetail {
        id: a.id,
        template_name: template_name(conn, a.template_id)?,
        status: a.status,
        sent_at: a.sent_at,
        updated_at: a.updated_at,
        fields,
        values,
    })
}

/// Upserts the provided (field_key, value) pairs. Keys that are not on
/// the template are stored anyway; they only matter at send time,
/// where an absent key reads back as empty.
pub fn save_district_values(
    conn: &Connection,
    assignment_id: i64,
    district_user_id: i64,
    values: &[(String, String)],
) -> Result<(), StoreError> {
    let Some(a) = get_assignment(conn, assignment_id, Some(district_user_id))? else {
        return Err(StoreError::NotFound("Assignment not found."));
    };
    if a.status == "sent" {
        return Err(StoreError::InvalidState(
            "Already sent. Ask admin to unlock.",
        ));
    }

    let ts = now_iso();
    if !values.is_empty() {
        for (key, value) in values {
            conn.execute(
                "INSERT INTO values_kv(id, assignment_id, field_key, value, updated_at)
                 VALUES(0, ?1, ?2, ?3, ?4)
                 ON CONFLICT(assignment_id, field_key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                (a.id, key, value, &ts),
            )?;
        }
        backfill_value_ids(conn, a.id, &ts)?;
    }

    conn.execute(
        "UPDATE assignments SET updated_at = ?1 WHERE id = ?2",
        (&ts, a.id),
    )?;
    Ok(())
}

/// Validates required fields and flips the assignment to `sent`. On a
/// validation failure the assignment is left untouched. On success the
/// returned payload is everything the notification sink needs; whether
/// that notification goes out has no bearing on the committed state.
pub fn send_district_submission(
    conn: &Connection,
    assignment_id: i64,
    district_user_id: i64,
) -> Result<SubmissionOutcome, StoreError> {
    let Some(a) = get_assignment(conn, assignment_id, Some(district_user_id))? else {
        return Err(StoreError::NotFound("Assignment not found."));
    };
    if a.status == "sent" {
        return Err(StoreError::InvalidState("Already sent."));
    }

    let fields = ordered_fields(conn, a.template_id)?;
    let vmap: HashMap<String, String> = value_map(conn, a.id)?
        .into_iter()
        .map(|(k, v)| (k, v.trim().to_string()))
        .collect();

    let missing: Vec<&str> = fields
        .iter()
        .filter(|f| {
            f.required
                && vmap
                    .get(&f.field_key)
                    .map(|v| v.is_empty())
                    .unwrap_or(true)
        })
        .map(|f| f.label.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::Validation(format!(
            "Required fields missing: {}",
            missing.join(", ")
        )));
    }

    let ts = now_iso();
    conn.execute(
        "UPDATE assignments SET status = 'sent', sent_at = ?1, updated_at = ?1 WHERE id = ?2",
        (&ts, a.id),
    )?;

    let rows = fields
        .into_iter()
        .map(|f| LabelValue {
            value: vmap.get(&f.field_key).cloned().unwrap_or_default(),
            label: f.label,
        })
        .collect();

    Ok(SubmissionOutcome {
        district_name: district_display_name(conn, a.district_user_id)?,
        template_name: template_name(conn, a.template_id)?,
        sent_at: ts,
        rows,
    })
}
