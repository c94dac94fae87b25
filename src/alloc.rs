//! Surrogate-key allocation over the workspace database.
//!
//! Each entity collection has a row in `counters` acting as a cache of
//! the derived invariant `counter >= max(id)`. The cache is never
//! trusted: every allocation re-validates it against the collection
//! first, so a counter that went missing, picked up a non-numeric
//! value, or fell behind the data (bulk import, hand edit, partial
//! write) self-heals instead of handing out a colliding id.

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Users,
    Templates,
    Fields,
    Assignments,
    Values,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Users,
        Entity::Templates,
        Entity::Fields,
        Entity::Assignments,
        Entity::Values,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Entity::Users => "users",
            Entity::Templates => "templates",
            Entity::Fields => "fields",
            Entity::Assignments => "assignments",
            Entity::Values => "values_kv",
        }
    }

    /// Counter rows are keyed by collection name.
    pub fn counter(self) -> &'static str {
        self.table()
    }

    fn has_updated_at(self) -> bool {
        !matches!(self, Entity::Users | Entity::Fields)
    }
}

#[derive(Debug)]
pub enum AllocError {
    /// The counter produced a non-numeric value even after one
    /// repair-and-retry. The caller must abort whatever creation
    /// triggered the allocation.
    Corrupted(Entity),
    Db(rusqlite::Error),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::Corrupted(e) => write!(
                f,
                "counter '{}' is corrupted and could not be repaired",
                e.counter()
            ),
            AllocError::Db(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AllocError::Db(e) => Some(e),
            AllocError::Corrupted(_) => None,
        }
    }
}

impl From<rusqlite::Error> for AllocError {
    fn from(e: rusqlite::Error) -> Self {
        AllocError::Db(e)
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Loose numeric coercion: integers, finite reals (floored) and
/// numeric strings all count. Everything else is ignored, the way a
/// max-scan must ignore garbage rather than choke on it.
fn coerce_num(v: &Value) -> Option<i64> {
    match v {
        Value::Integer(i) => Some(*i),
        Value::Real(f) if f.is_finite() => Some(f.floor() as i64),
        Value::Text(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            let f: f64 = t.parse().ok()?;
            f.is_finite().then(|| f.floor() as i64)
        }
        _ => None,
    }
}

/// Strict form used when judging whether a stored document id is
/// usable as-is: it must read back as a positive whole number.
fn valid_doc_id(v: &Value) -> Option<i64> {
    match v {
        Value::Integer(i) if *i > 0 => Some(*i),
        Value::Real(f) if f.is_finite() && f.fract() == 0.0 && *f > 0.0 => Some(*f as i64),
        Value::Text(s) => {
            let f: f64 = s.trim().parse().ok()?;
            (f.is_finite() && f.fract() == 0.0 && f > 0.0).then(|| f as i64)
        }
        _ => None,
    }
}

/// Max numeric id present in the collection, 0 when empty. Scans
/// row-wise instead of `MAX(CAST(..))` because CAST maps garbage to 0
/// where we need it ignored.
pub fn max_existing_id(conn: &Connection, entity: Entity) -> Result<i64, AllocError> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {}", entity.table()))?;
    let mut rows = stmt.query([])?;
    let mut max = 0i64;
    while let Some(row) = rows.next()? {
        let v: Value = row.get(0)?;
        if let Some(n) = coerce_num(&v) {
            if n > max {
                max = n;
            }
        }
    }
    Ok(max)
}

/// Ensures the persisted counter exists, is a plain integer, and is
/// `>= max(id)` in its collection. Idempotent; safe (and required)
/// before every allocation.
pub fn counter_health_check(conn: &Connection, entity: Entity) -> Result<(), AllocError> {
    let max_id = max_existing_id(conn, entity)?;

    let raw: Option<Value> = conn
        .query_row(
            "SELECT value FROM counters WHERE id = ?",
            [entity.counter()],
            |r| r.get(0),
        )
        .optional()?;

    let (target, rewrite) = match raw {
        // Missing, NULL or hopeless: reset to the observed maximum.
        None | Some(Value::Null) | Some(Value::Blob(_)) => (max_id, true),
        // Already a plain integer: only clamp up when behind the data.
        Some(Value::Integer(i)) => {
            let fixed = i.max(max_id);
            (fixed, fixed != i)
        }
        // Numeric but the wrong shape (real, numeric text): floor,
        // clamp, and rewrite so the stored type goes back to integer.
        Some(ref v) => match coerce_num(v) {
            Some(n) => (n.max(max_id), true),
            None => (max_id, true),
        },
    };

    if rewrite {
        conn.execute(
            "INSERT INTO counters(id, value) VALUES(?1, ?2)
             ON CONFLICT(id) DO UPDATE SET value = excluded.value",
            (entity.counter(), target),
        )?;
    }
    Ok(())
}

fn try_increment(conn: &Connection, entity: Entity) -> Result<Option<i64>, AllocError> {
    // Single statement: the increment-and-read is atomic with respect
    // to any other connection on the same database.
    let v: Value = conn.query_row(
        "INSERT INTO counters(id, value) VALUES(?1, 1)
         ON CONFLICT(id) DO UPDATE SET value = value + 1
         RETURNING value",
        [entity.counter()],
        |r| r.get(0),
    )?;
    Ok(coerce_num(&v).filter(|n| *n > 0))
}

/// Next unused id for the entity. Health-checks first, increments
/// atomically, and if the incremented value still reads back as
/// non-numeric retries the whole sequence exactly once before giving
/// up with a fatal [`AllocError::Corrupted`].
pub fn next_id(conn: &Connection, entity: Entity) -> Result<i64, AllocError> {
    counter_health_check(conn, entity)?;
    if let Some(n) = try_increment(conn, entity)? {
        return Ok(n);
    }

    counter_health_check(conn, entity)?;
    if let Some(n) = try_increment(conn, entity)? {
        return Ok(n);
    }

    Err(AllocError::Corrupted(entity))
}

/// Re-keys every document in the collection whose id is missing, NULL,
/// non-numeric, non-positive, fractional, or a duplicate of an id seen
/// earlier in rowid order. Touches only `id` (and `updated_at` where
/// the table carries one). Returns how many documents were re-keyed.
pub fn repair_collection_ids(conn: &Connection, entity: Entity) -> Result<usize, AllocError> {
    let mut bad: Vec<i64> = Vec::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, id FROM {} ORDER BY rowid",
            entity.table()
        ))?;
        let mut rows = stmt.query([])?;
        let mut seen: HashSet<i64> = HashSet::new();
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let v: Value = row.get(1)?;
            match valid_doc_id(&v) {
                Some(n) if seen.insert(n) => {}
                _ => bad.push(rowid),
            }
        }
    }

    let ts = now_iso();
    for rowid in &bad {
        let new_id = next_id(conn, entity)?;
        if entity.has_updated_at() {
            conn.execute(
                &format!(
                    "UPDATE {} SET id = ?1, updated_at = ?2 WHERE rowid = ?3",
                    entity.table()
                ),
                (new_id, &ts, rowid),
            )?;
        } else {
            conn.execute(
                &format!("UPDATE {} SET id = ?1 WHERE rowid = ?2", entity.table()),
                (new_id, rowid),
            )?;
        }
    }
    Ok(bad.len())
}

/// Template ids get re-validated on the hot admin paths too, not just
/// at startup, because they fan out into fields and assignments.
pub fn repair_template_ids(conn: &Connection) -> Result<usize, AllocError> {
    counter_health_check(conn, Entity::Templates)?;
    repair_collection_ids(conn, Entity::Templates)
}

/// Startup repair: health-check every counter, then re-key bad ids in
/// every collection. Running it twice in a row is a no-op the second
/// time.
pub fn repair_all(conn: &Connection) -> Result<usize, AllocError> {
    let mut repaired = 0usize;
    for entity in Entity::ALL {
        counter_health_check(conn, entity)?;
        repaired += repair_collection_ids(conn, entity)?;
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn mem_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn insert_template(conn: &Connection, id_sql: &str, name: &str) {
        conn.execute(
            &format!(
                "INSERT INTO templates(id, name, published, created_at, updated_at)
                 VALUES({}, ?1, 0, ?2, ?2)",
                id_sql
            ),
            (name, "2024-01-01T00:00:00.000Z"),
        )
        .expect("insert template");
    }

    fn set_counter(conn: &Connection, name: &str, value_sql: &str) {
        conn.execute(
            &format!(
                "INSERT INTO counters(id, value) VALUES(?1, {v})
                 ON CONFLICT(id) DO UPDATE SET value = {v}",
                v = value_sql
            ),
            [name],
        )
        .expect("set counter");
    }

    fn counter_value(conn: &Connection, name: &str) -> Value {
        conn.query_row("SELECT value FROM counters WHERE id = ?", [name], |r| {
            r.get(0)
        })
        .expect("counter row")
    }

    #[test]
    fn next_id_is_distinct_and_increasing() {
        let conn = mem_db();
        let mut seen = HashSet::new();
        let mut prev = 0;
        for _ in 0..50 {
            let id = next_id(&conn, Entity::Templates).expect("next id");
            assert!(id > prev, "ids must increase: {} after {}", id, prev);
            assert!(seen.insert(id), "duplicate id {}", id);
            prev = id;
        }
    }

    #[test]
    fn interleaved_connections_never_collide() {
        let dir = std::env::temp_dir().join(format!(
            "fieldbookd-alloc-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let a = db::open_db(&dir).expect("conn a");
        let b = db::open_db(&dir).expect("conn b");

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let x = next_id(&a, Entity::Fields).expect("a next");
            let y = next_id(&b, Entity::Fields).expect("b next");
            assert!(seen.insert(x), "duplicate from a: {}", x);
            assert!(seen.insert(y), "duplicate from b: {}", y);
        }
    }

    #[test]
    fn text_counter_behind_data_heals_past_max() {
        let conn = mem_db();
        insert_template(&conn, "500", "survey");
        set_counter(&conn, "templates", "'not-a-number'");

        let id = next_id(&conn, Entity::Templates).expect("next id");
        assert_eq!(id, 501);
    }

    #[test]
    fn integer_counter_behind_data_is_clamped_up() {
        let conn = mem_db();
        insert_template(&conn, "500", "survey");
        set_counter(&conn, "templates", "3");

        assert_eq!(next_id(&conn, Entity::Templates).expect("next id"), 501);
    }

    #[test]
    fn missing_counter_row_starts_from_max() {
        let conn = mem_db();
        insert_template(&conn, "7", "survey");

        assert_eq!(next_id(&conn, Entity::Templates).expect("next id"), 8);
    }

    #[test]
    fn fractional_counter_is_floored_and_normalized() {
        let conn = mem_db();
        set_counter(&conn, "templates", "41.7");

        counter_health_check(&conn, Entity::Templates).expect("health check");
        assert_eq!(counter_value(&conn, "templates"), Value::Integer(41));
        assert_eq!(next_id(&conn, Entity::Templates).expect("next id"), 42);
    }

    #[test]
    fn health_check_leaves_healthy_counter_alone() {
        let conn = mem_db();
        insert_template(&conn, "4", "survey");
        set_counter(&conn, "templates", "9");

        counter_health_check(&conn, Entity::Templates).expect("health check");
        assert_eq!(counter_value(&conn, "templates"), Value::Integer(9));
    }

    #[test]
    fn repair_rekeys_null_garbage_and_duplicate_ids() {
        let conn = mem_db();
        insert_template(&conn, "9", "good");
        insert_template(&conn, "NULL", "null id");
        insert_template(&conn, "'oops'", "text id");
        insert_template(&conn, "5", "dup a");
        insert_template(&conn, "5", "dup b");

        let repaired = repair_all(&conn).expect("repair");
        assert_eq!(repaired, 3);

        let mut stmt = conn.prepare("SELECT id FROM templates").expect("prepare");
        let ids: Vec<i64> = stmt
            .query_map([], |r| r.get(0))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("collect");
        let distinct: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), 5);
        assert!(ids.iter().all(|id| *id > 0));
        // First occurrence of the duplicated id keeps it.
        assert!(distinct.contains(&5));
        assert!(distinct.contains(&9));
    }

    #[test]
    fn repair_all_is_idempotent() {
        let conn = mem_db();
        insert_template(&conn, "NULL", "null id");
        insert_template(&conn, "3", "good");
        set_counter(&conn, "fields", "'junk'");

        let first = repair_all(&conn).expect("first repair");
        assert_eq!(first, 1);
        let counters_after_first: Vec<(String, Value)> = {
            let mut stmt = conn
                .prepare("SELECT id, value FROM counters ORDER BY id")
                .expect("prepare");
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .expect("query")
                .collect::<Result<_, _>>()
                .expect("collect")
        };

        let second = repair_all(&conn).expect("second repair");
        assert_eq!(second, 0);
        let counters_after_second: Vec<(String, Value)> = {
            let mut stmt = conn
                .prepare("SELECT id, value FROM counters ORDER BY id")
                .expect("prepare");
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .expect("query")
                .collect::<Result<_, _>>()
                .expect("collect")
        };
        assert_eq!(counters_after_first, counters_after_second);
    }

    #[test]
    fn repair_rekeys_value_rows_left_on_the_zero_sentinel() {
        let conn = mem_db();
        conn.execute(
            "INSERT INTO values_kv(id, assignment_id, field_key, value, updated_at)
             VALUES(0, 1, 'yield_qtl', '', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .expect("insert sentinel row");

        let repaired = repair_all(&conn).expect("repair");
        assert_eq!(repaired, 1);
        let id: i64 = conn
            .query_row(
                "SELECT id FROM values_kv WHERE field_key = 'yield_qtl'",
                [],
                |r| r.get(0),
            )
            .expect("read back");
        assert!(id > 0);
    }
}
