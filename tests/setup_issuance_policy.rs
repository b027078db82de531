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
fn setup_issuance_roundtrip_and_validation() {
    let workspace = temp_dir("diplomad-setup-issuance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        defaults["issuance"],
        json!({
            "defaultDegreeTitle": "Bachelor of Science",
            "defaultSpecialization": "Computer Science",
            "enforceCreditTotal": false,
            "strictMarkRanges": false
        })
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "issuance",
            "patch": { "defaultDegreeTitle": "  Bachelor of Arts ", "strictMarkRanges": true }
        }),
    );
    let updated = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(updated["issuance"]["defaultDegreeTitle"], json!("Bachelor of Arts"));
    assert_eq!(updated["issuance"]["strictMarkRanges"], json!(true));
    assert_eq!(updated["issuance"]["enforceCreditTotal"], json!(false));

    for (i, patch) in [
        json!({ "section": "issuance", "patch": { "enforceCreditTotal": "yes" } }),
        json!({ "section": "issuance", "patch": { "defaultSpecialization": "  " } }),
        json!({ "section": "issuance", "patch": { "colour": "blue" } }),
        json!({ "section": "printing", "patch": {} }),
        json!({ "section": "issuance", "patch": [] }),
        json!({ "patch": { "strictMarkRanges": false } }),
        json!({
            "section": "issuance",
            "patch": { "strictMarkRanges": false },
            "dryRun": true
        }),
    ]
    .into_iter()
    .enumerate()
    {
        let res = request(&mut stdin, &mut reader, &format!("bad{}", i), "setup.update", patch);
        assert_eq!(error_code(&res), "bad_params");
    }

    // A rejected patch leaves the stored section untouched.
    let unchanged = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));
    assert_eq!(unchanged["issuance"], updated["issuance"]);

    drop(stdin);
    let _ = child.wait();

    // Settings survive a restart.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reopened = request_ok(&mut stdin, &mut reader, "7", "setup.get", json!({}));
    assert_eq!(reopened["issuance"], updated["issuance"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn strict_mark_ranges_gate_the_calculator() {
    let workspace = temp_dir("diplomad-setup-strict");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let marks = json!({
        "marks": [
            { "moduleId": "m1", "mark": 60, "credits": 10 },
            { "moduleId": "m2", "mark": 120, "credits": 10 }
        ]
    });
    let permissive = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classification.calculate",
        marks.clone(),
    );
    assert_eq!(permissive["averageMark"].as_f64(), Some(90.0));
    assert_eq!(permissive["classification"], json!("1st"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "issuance", "patch": { "strictMarkRanges": true } }),
    );
    let strict = request(&mut stdin, &mut reader, "4", "classification.calculate", marks);
    assert_eq!(error_code(&strict), "bad_marks");
    assert_eq!(strict["error"]["details"]["moduleId"], json!("m2"));
    assert_eq!(strict["error"]["details"]["range"]["field"], json!("mark"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn enforced_credit_total_blocks_short_programs() {
    let workspace = temp_dir("diplomad-setup-credits");
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
        json!({ "name": "Credits University" }),
    );
    let university_id = result_str(&university, "universityId");
    // The program asks for more credits than its modules carry.
    let program = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({
            "universityId": university_id,
            "title": "BSc History",
            "level": "Bachelor",
            "totalCreditsRequired": 40
        }),
    );
    let program_id = result_str(&program, "programId");
    let module = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "modules.create",
        json!({ "programId": program_id, "code": "HI101", "name": "Antiquity", "credits": 30 }),
    );
    let module_id = result_str(&module, "moduleId");

    let mut students = Vec::new();
    for m in ["H001", "H002"] {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s-{}", m),
            "students.create",
            json!({
                "universityId": university_id,
                "programId": program_id,
                "firstName": "Student",
                "lastName": m,
                "matricule": m,
                "email": format!("{}@test.ac.uk", m.to_lowercase())
            }),
        );
        let student_id = result_str(&s, "studentId");
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g-{}", m),
            "grades.create",
            json!({ "studentId": student_id, "moduleId": module_id, "mark": 55 }),
        );
        students.push(student_id);
    }

    let lenient = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "certificates.issue",
        json!({ "studentId": students[0], "graduationDate": "2025-01-31" }),
    );
    assert_eq!(lenient["certificate"]["degreeClassification"], json!("2:2"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({
            "section": "issuance",
            "patch": { "enforceCreditTotal": true, "defaultSpecialization": "History" }
        }),
    );
    let blocked = request(
        &mut stdin,
        &mut reader,
        "7",
        "certificates.issue",
        json!({ "studentId": students[1] }),
    );
    assert_eq!(error_code(&blocked), "credit_mismatch");
    assert_eq!(blocked["error"]["details"]["totalCredits"], json!(30));
    assert_eq!(blocked["error"]["details"]["requiredCredits"], json!(40));
    assert_eq!(blocked["error"]["details"]["difference"], json!(10));

    // Lowering the requirement lets issuance through with the new default.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "programs.update",
        json!({ "programId": program_id, "patch": { "totalCreditsRequired": 30 } }),
    );
    let issued = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "certificates.issue",
        json!({ "studentId": students[1] }),
    );
    assert_eq!(issued["certificate"]["specialization"], json!("History"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
