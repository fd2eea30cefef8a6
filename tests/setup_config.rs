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

fn seed_ids(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let session_id = request_ok(stdin, reader, "s", "sessions.create", json!({ "name": "2025" }))
        ["sessionId"]
        .as_str()
        .expect("sessionId")
        .to_string();
    let class_id = request_ok(stdin, reader, "c", "classes.create", json!({ "name": "VII" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    (session_id, class_id)
}

#[test]
fn marks_distribution_round_trips_and_reports_configured_state() {
    let workspace = temp_dir("marksheetd-setup-dist");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, class_id) = seed_ids(&mut stdin, &mut reader, &workspace);

    // Before configuration: built-in defaults, flagged unconfigured.
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "setup.marksDistributionGet",
        json!({ "classId": class_id, "sessionId": session_id }),
    );
    assert_eq!(got["configured"].as_bool(), Some(false));
    assert_eq!(got["firstSummativeFull"].as_f64(), Some(40.0));
    assert_eq!(got["firstFormativeFull"].as_f64(), Some(10.0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "setup.marksDistributionSet",
        json!({
            "classId": class_id,
            "sessionId": session_id,
            "firstSummativeFull": 70.0,
            "firstFormativeFull": 30.0,
            "secondSummativeFull": 70.0,
            "secondFormativeFull": 30.0,
            "thirdSummativeFull": 70.0,
            "thirdFormativeFull": 30.0
        }),
    );

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "setup.marksDistributionGet",
        json!({ "classId": class_id, "sessionId": session_id }),
    );
    assert_eq!(got["configured"].as_bool(), Some(true));
    assert_eq!(got["thirdSummativeFull"].as_f64(), Some(70.0));
    assert_eq!(got["thirdFormativeFull"].as_f64(), Some(30.0));

    let _ = child.kill();
}

#[test]
fn marks_distribution_rejects_non_positive_full_marks() {
    let workspace = temp_dir("marksheetd-setup-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, class_id) = seed_ids(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "s1",
        "setup.marksDistributionSet",
        json!({
            "classId": class_id,
            "sessionId": session_id,
            "firstSummativeFull": 0.0,
            "firstFormativeFull": 10.0,
            "secondSummativeFull": 40.0,
            "secondFormativeFull": 10.0,
            "thirdSummativeFull": 40.0,
            "thirdFormativeFull": 10.0
        }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(false));
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let _ = child.kill();
}

#[test]
fn school_days_round_trip() {
    let workspace = temp_dir("marksheetd-setup-days");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, _class_id) = seed_ids(&mut stdin, &mut reader, &workspace);

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "setup.schoolDaysGet",
        json!({ "sessionId": session_id }),
    );
    assert!(got["totalSchoolDays"].is_null());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "setup.schoolDaysSet",
        json!({ "sessionId": session_id, "totalSchoolDays": 212 }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "setup.schoolDaysGet",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(got["totalSchoolDays"].as_i64(), Some(212));

    let resp = request(
        &mut stdin,
        &mut reader,
        "s2",
        "setup.schoolDaysSet",
        json!({ "sessionId": session_id, "totalSchoolDays": 0 }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let _ = child.kill();
}

#[test]
fn subject_full_marks_override_feeds_later_saves() {
    let workspace = temp_dir("marksheetd-setup-fullmarks");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, class_id) = seed_ids(&mut stdin, &mut reader, &workspace);

    let subject_id = request_ok(
        &mut stdin,
        &mut reader,
        "sub",
        "subjects.create",
        json!({ "classId": class_id, "name": "Drawing", "kind": "optional" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let section_id = request_ok(
        &mut stdin,
        &mut reader,
        "sec",
        "sections.create",
        json!({ "classId": class_id, "name": "A" }),
    )["sectionId"]
        .as_str()
        .expect("sectionId")
        .to_string();
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.create",
        json!({
            "classId": class_id,
            "sectionId": section_id,
            "sessionId": session_id,
            "firstName": "Asha",
            "lastName": "Pal"
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "setup.subjectFullMarksSet",
        json!({ "subjectId": subject_id, "fullMarks": 100.0 }),
    );

    let save = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "results.saveOptional",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "sessionId": session_id,
            "obtainedMarks": 80.0
        }),
    );
    assert_eq!(save["fullMarks"].as_f64(), Some(100.0));
    assert_eq!(save["obtainedMarks"].as_f64(), Some(80.0));
    assert_eq!(save["grade"].as_str(), Some("A+"));

    let _ = child.kill();
}
