use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("fieldbook.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates all tables and indexes.
///
/// Surrogate `id` columns are plain INTEGER, not PRIMARY KEY and not
/// UNIQUE: the allocator owns id uniqueness, repair must be able to
/// observe rows whose id drifted (NULL, garbage text, duplicates), and
/// fan-out parks freshly upserted value rows on an `id = 0` sentinel
/// until the allocator backfills them. The rowid is the storage-native
/// document identity.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_users_id ON users(id)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id INTEGER,
            name TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            created_by INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_templates_id ON templates(id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_templates_updated ON templates(updated_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fields(
            id INTEGER,
            template_id INTEGER NOT NULL,
            field_key TEXT NOT NULL,
            label TEXT NOT NULL,
            type TEXT NOT NULL,
            required INTEGER NOT NULL,
            options TEXT NOT NULL DEFAULT '[]',
            order_index INTEGER NOT NULL,
            UNIQUE(template_id, field_key)
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_fields_id ON fields(id)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fields_template_order ON fields(template_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id INTEGER,
            template_id INTEGER NOT NULL,
            district_user_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            sent_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(template_id, district_user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_id ON assignments(id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_district_updated
         ON assignments(district_user_id, updated_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS values_kv(
            id INTEGER,
            assignment_id INTEGER NOT NULL,
            field_key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(assignment_id, field_key)
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_values_id ON values_kv(id)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_values_assignment ON values_kv(assignment_id)",
        [],
    )?;

    // One row per entity collection. `value` is deliberately untyped:
    // drifted counters (text, reals, NULL) must be representable so the
    // allocator's health check has something to repair.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS counters(
            id TEXT PRIMARY KEY,
            value
        )",
        [],
    )?;

    // Workspaces created before district display names existed lack the
    // column. Add it; NULL means "fall back to the username".
    ensure_users_district_name(conn)?;

    Ok(())
}

fn ensure_users_district_name(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "district_name")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN district_name TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
