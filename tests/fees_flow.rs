use serde_json::json;
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_marksheetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Seed {
    session_id: String,
    class_id: String,
    student_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let session_id = request_ok(stdin, reader, "se", "sessions.create", json!({ "name": "2025" }))
        ["sessionId"]
        .as_str()
        .expect("sessionId")
        .to_string();
    let class_id = request_ok(stdin, reader, "cl", "classes.create", json!({ "name": "VI" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let section_id = request_ok(
        stdin,
        reader,
        "sc",
        "sections.create",
        json!({ "classId": class_id, "name": "A" }),
    )["sectionId"]
        .as_str()
        .expect("sectionId")
        .to_string();
    let student_id = request_ok(
        stdin,
        reader,
        "st",
        "students.create",
        json!({
            "classId": class_id,
            "sectionId": section_id,
            "sessionId": session_id,
            "firstName": "Riya",
            "lastName": "Sen"
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    Seed {
        session_id,
        class_id,
        student_id,
    }
}

#[test]
fn statement_tracks_payments_against_heads() {
    let workspace = temp_dir("marksheetd-fees-statement");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let tuition = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "fees.createHead",
        json!({
            "classId": seed.class_id,
            "sessionId": seed.session_id,
            "name": "Tuition",
            "amount": 1200.0
        }),
    )["feeHeadId"]
        .as_str()
        .expect("feeHeadId")
        .to_string();
    let _exam = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "fees.createHead",
        json!({
            "classId": seed.class_id,
            "sessionId": seed.session_id,
            "name": "Exam",
            "amount": 300.0
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "fees.recordPayment",
        json!({
            "feeHeadId": tuition,
            "studentId": seed.student_id,
            "amount": 500.0,
            "method": "cash"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "fees.recordPayment",
        json!({
            "feeHeadId": tuition,
            "studentId": seed.student_id,
            "amount": 200.0,
            "paidOn": "2025-06-01T00:00:00Z"
        }),
    );

    let statement = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "fees.studentStatement",
        json!({ "studentId": seed.student_id }),
    );
    assert_eq!(statement["totalDue"].as_f64(), Some(1500.0));
    assert_eq!(statement["totalPaid"].as_f64(), Some(700.0));
    assert_eq!(statement["balance"].as_f64(), Some(800.0));

    let heads = statement["heads"].as_array().expect("heads array");
    assert_eq!(heads.len(), 2);
    // Heads come back ordered by name.
    assert_eq!(heads[0]["name"].as_str(), Some("Exam"));
    assert_eq!(heads[0]["paid"].as_f64(), Some(0.0));
    assert_eq!(heads[0]["balance"].as_f64(), Some(300.0));
    assert_eq!(heads[1]["name"].as_str(), Some("Tuition"));
    assert_eq!(heads[1]["paid"].as_f64(), Some(700.0));
    assert_eq!(heads[1]["balance"].as_f64(), Some(500.0));

    let _ = child.kill();
}

#[test]
fn head_with_payments_cannot_be_deleted() {
    let workspace = temp_dir("marksheetd-fees-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let head_id = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "fees.createHead",
        json!({
            "classId": seed.class_id,
            "sessionId": seed.session_id,
            "name": "Library",
            "amount": 150.0
        }),
    )["feeHeadId"]
        .as_str()
        .expect("feeHeadId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "fees.recordPayment",
        json!({
            "feeHeadId": head_id,
            "studentId": seed.student_id,
            "amount": 150.0
        }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "d1",
        "fees.deleteHead",
        json!({ "feeHeadId": head_id }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let _ = child.kill();
}

#[test]
fn invalid_amounts_are_rejected() {
    let workspace = temp_dir("marksheetd-fees-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "h1",
        "fees.createHead",
        json!({
            "classId": seed.class_id,
            "sessionId": seed.session_id,
            "name": "Tuition",
            "amount": 0.0
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let head_id = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "fees.createHead",
        json!({
            "classId": seed.class_id,
            "sessionId": seed.session_id,
            "name": "Tuition",
            "amount": 900.0
        }),
    )["feeHeadId"]
        .as_str()
        .expect("feeHeadId")
        .to_string();
    let resp = request(
        &mut stdin,
        &mut reader,
        "p1",
        "fees.recordPayment",
        json!({
            "feeHeadId": head_id,
            "studentId": seed.student_id,
            "amount": -50.0
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let _ = child.kill();
}
