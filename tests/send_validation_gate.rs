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

fn error_of(value: &Value) -> (String, String) {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    (
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    )
}

#[test]
fn send_is_gated_on_required_fields_and_lock_state() {
    let workspace = temp_dir("fieldbookd-gate");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        Value::Null,
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "username": "yavatmal", "password": "pw", "role": "district" }),
        admin_auth(),
    );
    let district_id = created
        .get("userId")
        .and_then(|v| v.as_i64())
        .expect("district id");

    let tpl = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "templates.create",
        json!({ "name": "Crop Report" }),
        admin_auth(),
    );
    let template_id = tpl
        .get("templateId")
        .and_then(|v| v.as_i64())
        .expect("template id");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fields.add",
        json!({
            "templateId": template_id,
            "label": "Yield (qtl)",
            "type": "number",
            "required": true
        }),
        admin_auth(),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fields.add",
        json!({ "templateId": template_id, "label": "Remarks", "type": "textarea" }),
        admin_auth(),
    );
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
        json!({ "templateId": template_id, "districtUserIds": [district_id] }),
        admin_auth(),
    );

    let assignments = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "district.assignments.list",
        json!({}),
        district_auth(district_id),
    );
    let assignment_id = assignments
        .get("assignments")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_i64())
        .expect("assignment id");

    // Whitespace does not satisfy a required field.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "district.assignments.save",
        json!({
            "assignmentId": assignment_id,
            "values": [{ "fieldKey": "yield_qtl", "value": "   " }]
        }),
        district_auth(district_id),
    );
    let blocked = request(
        &mut stdin,
        &mut reader,
        "10",
        "district.assignments.send",
        json!({ "assignmentId": assignment_id }),
        district_auth(district_id),
    );
    let (code, message) = error_of(&blocked);
    assert_eq!(code, "validation_failed");
    assert!(
        message.contains("Yield (qtl)"),
        "message must name the missing label: {}",
        message
    );

    // The failed send must not have mutated the assignment.
    let still_draft = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "district.assignments.get",
        json!({ "assignmentId": assignment_id }),
        district_auth(district_id),
    );
    assert_eq!(
        still_draft.get("status").and_then(|v| v.as_str()),
        Some("draft")
    );
    assert!(still_draft
        .get("sentAt")
        .map(|v| v.is_null())
        .unwrap_or(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "district.assignments.save",
        json!({
            "assignmentId": assignment_id,
            "values": [{ "fieldKey": "yield_qtl", "value": "120" }]
        }),
        district_auth(district_id),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "district.assignments.send",
        json!({ "assignmentId": assignment_id }),
        district_auth(district_id),
    );

    // Sent means read-only for the district.
    let save_after_send = request(
        &mut stdin,
        &mut reader,
        "14",
        "district.assignments.save",
        json!({
            "assignmentId": assignment_id,
            "values": [{ "fieldKey": "yield_qtl", "value": "999" }]
        }),
        district_auth(district_id),
    );
    let (code, message) = error_of(&save_after_send);
    assert_eq!(code, "invalid_state");
    assert!(message.contains("Already sent"), "got {}", message);

    let resend = request(
        &mut stdin,
        &mut reader,
        "15",
        "district.assignments.send",
        json!({ "assignmentId": assignment_id }),
        district_auth(district_id),
    );
    assert_eq!(error_of(&resend).0, "invalid_state");

    // Unlock reopens editing; a second unlock is a harmless no-op.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "submissions.unlock",
        json!({ "assignmentId": assignment_id }),
        admin_auth(),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "submissions.unlock",
        json!({ "assignmentId": assignment_id }),
        admin_auth(),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "district.assignments.save",
        json!({
            "assignmentId": assignment_id,
            "values": [{ "fieldKey": "yield_qtl", "value": "130" }]
        }),
        district_auth(district_id),
    );
}
