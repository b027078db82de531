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
    let exe = env!("CARGO_BIN_EXE_diplomad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn diplomad");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn result_str(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

#[test]
fn student_records_create_get_update_and_follow_the_student() {
    let workspace = temp_dir("diplomad-student-records");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let university = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "universities.create",
        json!({ "name": "Records University" }),
    );
    let university_id = result_str(&university, "universityId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "universityId": university_id,
            "firstName": "Mary",
            "lastName": "Somerville",
            "matricule": "R001",
            "email": "mary@records.ac.uk"
        }),
    );
    let student_id = result_str(&student, "studentId");

    for (i, params) in [
        json!({ "studentId": student_id, "attendance": 101 }),
        json!({ "studentId": student_id, "attendance": -1 }),
        json!({ "studentId": student_id, "attendance": 90, "photoUrl": "x" }),
        json!({ "studentId": student_id }),
    ]
    .into_iter()
    .enumerate()
    {
        let res = request(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "studentRecords.create",
            params,
        );
        assert_eq!(error_code(&res), "bad_params");
    }
    let nobody = request(
        &mut stdin,
        &mut reader,
        "4",
        "studentRecords.create",
        json!({ "studentId": "nobody", "attendance": 90 }),
    );
    assert_eq!(error_code(&nobody), "not_found");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "studentRecords.create",
        json!({
            "studentId": student_id,
            "attendance": 92,
            "discipline": "  No incidents  ",
            "transcriptPdfUrl": "https://files.records.ac.uk/r001/transcript.pdf"
        }),
    );
    let record_id = result_str(&created, "recordId");

    let again = request(
        &mut stdin,
        &mut reader,
        "6",
        "studentRecords.create",
        json!({ "studentId": student_id, "attendance": 50 }),
    );
    assert_eq!(error_code(&again), "conflict");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "studentRecords.get",
        json!({ "studentId": student_id }),
    );
    let record = &fetched["record"];
    assert_eq!(record["id"], json!(record_id));
    assert_eq!(record["studentName"], json!("Mary Somerville"));
    assert_eq!(record["attendance"], json!(92));
    assert_eq!(record["discipline"], json!("No incidents"));
    assert_eq!(record["gradesPdfUrl"], json!(""));
    assert_eq!(
        record["transcriptPdfUrl"],
        json!("https://files.records.ac.uk/r001/transcript.pdf")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "studentRecords.update",
        json!({
            "recordId": record_id,
            "patch": { "attendance": 88, "diplomaPdfUrl": "https://files.records.ac.uk/r001/diploma.pdf" }
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "studentRecords.list",
        json!({ "universityId": university_id }),
    );
    let records = listed["records"].as_array().cloned().unwrap_or_default();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["attendance"], json!(88));
    assert_eq!(records[0]["discipline"], json!("No incidents"));
    assert_eq!(
        records[0]["diplomaPdfUrl"],
        json!("https://files.records.ac.uk/r001/diploma.pdf")
    );
    assert_eq!(
        records[0]["transcriptPdfUrl"],
        json!("https://files.records.ac.uk/r001/transcript.pdf")
    );

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "10",
        "studentRecords.update",
        json!({ "recordId": record_id, "patch": { "attendance": 101 } }),
    );
    assert_eq!(error_code(&out_of_range), "bad_params");
    let unknown_key = request(
        &mut stdin,
        &mut reader,
        "11",
        "studentRecords.update",
        json!({ "recordId": record_id, "patch": { "studentId": "other" } }),
    );
    assert_eq!(error_code(&unknown_key), "bad_params");
    let missing = request(
        &mut stdin,
        &mut reader,
        "12",
        "studentRecords.update",
        json!({ "recordId": "missing", "patch": { "attendance": 10 } }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "14",
        "studentRecords.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(error_code(&gone), "not_found");
    let empty = request_ok(&mut stdin, &mut reader, "15", "studentRecords.list", json!({}));
    assert_eq!(empty["records"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_records_need_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let res = request(&mut stdin, &mut reader, "1", "studentRecords.list", json!({}));
    assert_eq!(error_code(&res), "no_workspace");
    drop(stdin);
    let _ = child.wait();
}
