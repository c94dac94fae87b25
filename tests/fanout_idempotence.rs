use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_fieldbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("ADMIN_USERNAME")
        .env_remove("ADMIN_PASSWORD")
        .env_remove("DISTRICT_DEFAULT_PASSWORD")
        .env_remove("ADMIN_EMAIL")
        .env_remove("SENDMAIL_CMD")
        .spawn()
        .expect("spawn fieldbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn admin_auth() -> Value {
    json!({ "userId": 1, "role": "admin" })
}

fn district_auth(user_id: i64) -> Value {
    json!({ "userId": user_id, "role": "district" })
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    auth: Value,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if !auth.is_null() {
        payload["auth"] = auth;
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    auth: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params, auth);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_district(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
) -> i64 {
    let created = request_ok(
        stdin,
        reader,
        id,
        "users.create",
        json!({ "username": username, "password": "pw", "role": "district" }),
        admin_auth(),
    );
    created
        .get("userId")
        .and_then(|v| v.as_i64())
        .expect("district user id")
}

fn table_count(workspace: &PathBuf, sql: &str) -> i64 {
    let conn =
        rusqlite::Connection::open(workspace.join("fieldbook.sqlite3")).expect("open db file");
    conn.query_row(sql, [], |r| r.get(0)).expect("count query")
}

#[test]
fn reassign_creates_nothing_new_and_preserves_district_work() {
    let workspace = temp_dir("fieldbookd-fanout");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        Value::Null,
    );

    let u1 = create_district(&mut stdin, &mut reader, "2", "buldhana");
    let u2 = create_district(&mut stdin, &mut reader, "3", "washim");

    let tpl = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "templates.create",
        json!({ "name": "Kharif Sowing" }),
        admin_auth(),
    );
    let template_id = tpl
        .get("templateId")
        .and_then(|v| v.as_i64())
        .expect("template id");

    for (i, label) in ["Sown Area", "Rainfall", "Remarks"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("5-{}", i),
            "fields.add",
            json!({ "templateId": template_id, "label": label, "type": "text" }),
            admin_auth(),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "templates.publish",
        json!({ "templateId": template_id }),
        admin_auth(),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "templates.assign",
        json!({ "templateId": template_id, "districtUserIds": [u1, u2] }),
        admin_auth(),
    );

    assert_eq!(table_count(&workspace, "SELECT COUNT(*) FROM assignments"), 2);
    assert_eq!(table_count(&workspace, "SELECT COUNT(*) FROM values_kv"), 6);
    assert_eq!(
        table_count(&workspace, "SELECT COUNT(*) FROM values_kv WHERE id <= 0"),
        0,
        "sentinel ids must be backfilled"
    );

    // District u1 fills a value and sends before the re-assignment.
    let assignments = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "district.assignments.list",
        json!({}),
        district_auth(u1),
    );
    let assignment_id = assignments
        .get("assignments")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_i64())
        .expect("u1 assignment");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "district.assignments.save",
        json!({
            "assignmentId": assignment_id,
            "values": [{ "fieldKey": "sown_area", "value": "480 ha" }]
        }),
        district_auth(u1),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "district.assignments.send",
        json!({ "assignmentId": assignment_id }),
        district_auth(u1),
    );

    // Second fan-out: same structure, no resets, no overwrites.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "templates.assign",
        json!({ "templateId": template_id, "districtUserIds": [u1, u2] }),
        admin_auth(),
    );

    assert_eq!(table_count(&workspace, "SELECT COUNT(*) FROM assignments"), 2);
    assert_eq!(table_count(&workspace, "SELECT COUNT(*) FROM values_kv"), 6);

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "district.assignments.get",
        json!({ "assignmentId": assignment_id }),
        district_auth(u1),
    );
    assert_eq!(after.get("status").and_then(|v| v.as_str()), Some("sent"));
    let kept = after
        .get("values")
        .and_then(|v| v.as_array())
        .and_then(|vals| {
            vals.iter()
                .find(|v| v.get("fieldKey").and_then(|k| k.as_str()) == Some("sown_area"))
        })
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
        .expect("kept value");
    assert_eq!(kept, "480 ha");

    // Unknown district ids are skipped silently.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "templates.assign",
        json!({ "templateId": template_id, "districtUserIds": [9999] }),
        admin_auth(),
    );
    assert_eq!(table_count(&workspace, "SELECT COUNT(*) FROM assignments"), 2);
}
