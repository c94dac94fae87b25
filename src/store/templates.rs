use super::fields::{field_row_from_sql, FieldRow, FIELD_COLUMNS};
use super::{now_iso, StoreError};
use crate::alloc::{self, Entity};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: i64,
    pub name: String,
    pub published: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub field_count: i64,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub published: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDetail {
    pub id: i64,
    pub name: String,
    pub published: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub fields: Vec<FieldRow>,
}

/// All templates, newest activity first, with a derived field count.
/// Bad template ids are repaired up front so no caller ever sees a
/// NULL or garbage id.
pub fn list_templates(conn: &Connection) -> Result<Vec<TemplateSummary>, StoreError> {
    alloc::repair_template_ids(conn)?;

    let mut stmt = conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.published,
           t.created_by,
           t.created_at,
           t.updated_at,
           (SELECT COUNT(*) FROM fields f WHERE f.template_id = t.id) AS field_count
         FROM templates t
         ORDER BY t.updated_at DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(TemplateSummary {
                id: r.get(0)?,
                name: r.get(1)?,
                published: r.get::<_, i64>(2)? != 0,
                created_by: r.get(3)?,
                created_at: r.get(4)?,
                updated_at: r.get(5)?,
                field_count: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_template(
    conn: &Connection,
    name: &str,
    created_by: Option<i64>,
) -> Result<i64, StoreError> {
    // Keep the collection consistent before allocating from it.
    alloc::repair_template_ids(conn)?;

    let id = alloc::next_id(conn, Entity::Templates)?;
    let ts = now_iso();
    conn.execute(
        "INSERT INTO templates(id, name, published, created_by, created_at, updated_at)
         VALUES(?1, ?2, 0, ?3, ?4, ?4)",
        (id, name, created_by, &ts),
    )?;
    Ok(id)
}

pub fn get_template(conn: &Connection, id: i64) -> Result<Option<Template>, StoreError> {
    conn.query_row(
        "SELECT id, name, published, created_by, created_at, updated_at
         FROM templates WHERE id = ?",
        [id],
        |r| {
            Ok(Template {
                id: r.get(0)?,
                name: r.get(1)?,
                published: r.get::<_, i64>(2)? != 0,
                created_by: r.get(3)?,
                created_at: r.get(4)?,
                updated_at: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_template_detail(conn: &Connection, id: i64) -> Result<TemplateDetail, StoreError> {
    let Some(tpl) = get_template(conn, id)? else {
        return Err(StoreError::NotFound("Template not found."));
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM fields WHERE template_id = ? ORDER BY order_index, id",
        FIELD_COLUMNS
    ))?;
    let fields = stmt
        .query_map([id], field_row_from_sql)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TemplateDetail {
        id: tpl.id,
        name: tpl.name,
        published: tpl.published,
        created_by: tpl.created_by,
        created_at: tpl.created_at,
        updated_at: tpl.updated_at,
        fields,
    })
}

/// Rename. A missing id is a silent no-op, matching the rest of the
/// template write paths.
pub fn update_template(conn: &Connection, id: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE templates SET name = ?1, updated_at = ?2 WHERE id = ?3",
        (name, now_iso(), id),
    )?;
    Ok(())
}

/// One-way transition; there is no unpublish.
pub fn publish_template(conn: &Connection, id: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE templates SET published = 1, updated_at = ?1 WHERE id = ?2",
        (now_iso(), id),
    )?;
    Ok(())
}

/// Deletes the template and everything hanging off it. Deliberately
/// not a transaction: the delete order (values, then assignments, then
/// fields, then the template) is what bounds the inconsistency window,
/// and re-running after a crash mid-sequence converges to the same end
/// state.
pub fn delete_template_cascade(conn: &Connection, template_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM values_kv
         WHERE assignment_id IN (SELECT id FROM assignments WHERE template_id = ?)",
        [template_id],
    )?;
    conn.execute(
        "DELETE FROM assignments WHERE template_id = ?",
        [template_id],
    )?;
    conn.execute("DELETE FROM fields WHERE template_id = ?", [template_id])?;
    conn.execute("DELETE FROM templates WHERE id = ?", [template_id])?;
    Ok(())
}
