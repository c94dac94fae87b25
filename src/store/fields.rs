use super::{is_unique_violation, now_iso, FieldType, StoreError};
use crate::alloc::{self, Entity};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

pub(crate) const FIELD_COLUMNS: &str =
    "id, template_id, field_key, label, type, required, options, order_index";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRow {
    pub id: i64,
    pub template_id: i64,
    pub field_key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub options: Vec<String>,
    pub order_index: i64,
}

pub(crate) fn field_row_from_sql(r: &Row<'_>) -> rusqlite::Result<FieldRow> {
    let options_raw: String = r.get(6)?;
    Ok(FieldRow {
        id: r.get(0)?,
        template_id: r.get(1)?,
        field_key: r.get(2)?,
        label: r.get(3)?,
        field_type: r.get(4)?,
        required: r.get::<_, i64>(5)? != 0,
        options: serde_json::from_str(&options_raw).unwrap_or_default(),
        order_index: r.get(7)?,
    })
}

fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// Derives the stable join key from a label: Devanagari stripped,
/// everything else lowercased, non-alphanumeric runs collapsed to a
/// single underscore, leading/trailing underscores trimmed. An empty
/// result gets a random fallback key. The key is computed once at
/// creation and never regenerated, even when the label is edited.
pub fn slug_key(label: &str) -> String {
    let mut out = String::new();
    let mut pending_sep = false;
    for ch in label.trim().to_lowercase().chars() {
        if ('\u{0900}'..='\u{097F}').contains(&ch) {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() {
        format!("field_{}", random_suffix(6))
    } else {
        out
    }
}

pub fn add_field(
    conn: &Connection,
    template_id: i64,
    label: &str,
    field_type: Option<&str>,
    required: bool,
) -> Result<i64, StoreError> {
    let ftype = field_type
        .map(FieldType::parse_or_text)
        .unwrap_or(FieldType::Text);

    let order_index: i64 = conn.query_row(
        "SELECT COALESCE(MAX(order_index), 0) + 1 FROM fields WHERE template_id = ?",
        [template_id],
        |r| r.get(0),
    )?;

    let key = slug_key(label);
    let id = alloc::next_id(conn, Entity::Fields)?;

    let insert = |key: &str| {
        conn.execute(
            "INSERT INTO fields(id, template_id, field_key, label, type, required, options, order_index)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, '[]', ?7)",
            (
                id,
                template_id,
                key,
                label,
                ftype.as_str(),
                required as i64,
                order_index,
            ),
        )
    };

    match insert(&key) {
        Ok(_) => {}
        // Key collision within the template: retry once with a random
        // suffix, then give up.
        Err(e) if is_unique_violation(&e) => {
            let retry_key = format!("{}_{}", key, random_suffix(3));
            insert(&retry_key)?;
        }
        Err(e) => return Err(e.into()),
    }

    conn.execute(
        "UPDATE templates SET updated_at = ?1 WHERE id = ?2",
        (now_iso(), template_id),
    )?;
    Ok(id)
}

pub fn get_field(conn: &Connection, id: i64) -> Result<Option<FieldRow>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM fields WHERE id = ?", FIELD_COLUMNS),
        [id],
        field_row_from_sql,
    )
    .optional()
    .map_err(Into::into)
}

#[derive(Debug, Default)]
pub struct FieldPatch {
    pub label: Option<String>,
    pub field_type: Option<String>,
    pub required: Option<bool>,
    pub options: Option<Vec<String>>,
}

/// Partial update; every unspecified part keeps its prior value. An
/// invalid type in the patch keeps the old type. The field key is
/// never touched.
pub fn update_field(conn: &Connection, id: i64, patch: &FieldPatch) -> Result<(), StoreError> {
    let Some(existing) = get_field(conn, id)? else {
        return Err(StoreError::NotFound("Field not found."));
    };

    let label = patch.label.as_deref().unwrap_or(&existing.label);
    let ftype = match patch.field_type.as_deref() {
        Some(t) => match FieldType::parse(t) {
            Some(t) => t.as_str().to_string(),
            None => existing.field_type.clone(),
        },
        None => existing.field_type.clone(),
    };
    let required = patch.required.unwrap_or(existing.required);
    let options = patch.options.as_ref().unwrap_or(&existing.options);
    let options_json =
        serde_json::to_string(options).map_err(|e| StoreError::Validation(e.to_string()))?;

    conn.execute(
        "UPDATE fields SET label = ?1, type = ?2, required = ?3, options = ?4 WHERE id = ?5",
        (label, &ftype, required as i64, &options_json, id),
    )?;
    conn.execute(
        "UPDATE templates SET updated_at = ?1 WHERE id = ?2",
        (now_iso(), existing.template_id),
    )?;
    Ok(())
}

/// Removes the field definition only. Value rows keyed by the removed
/// field_key are left in place; read paths join through the template's
/// current fields, so they simply stop surfacing.
pub fn delete_field(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let Some(existing) = get_field(conn, id)? else {
        return Err(StoreError::NotFound("Field not found."));
    };

    conn.execute("DELETE FROM fields WHERE id = ?", [id])?;
    conn.execute(
        "UPDATE templates SET updated_at = ?1 WHERE id = ?2",
        (now_iso(), existing.template_id),
    )?;
    Ok(())
}
