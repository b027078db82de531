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

fn assert_dispatched(value: &serde_json::Value, method: &str) {
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
}

#[test]
fn router_rejects_unknown_methods_and_bad_lines() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["version"].is_string());
    assert!(health["result"]["workspacePath"].is_null());

    let unknown = request(&mut stdin, &mut reader, "2", "nope.method", json!({}));
    assert_eq!(unknown["ok"], json!(false));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    writeln!(stdin, "{{not json").expect("write bad line");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse reply");
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_json"));

    // Workspace-bound methods refuse to run before a workspace is selected.
    let no_ws = request(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(no_ws["error"]["code"], json!("no_workspace"));

    // The calculator needs no workspace.
    let calc = request(
        &mut stdin,
        &mut reader,
        "4",
        "classification.calculate",
        json!({ "marks": [{ "mark": 72.0, "credits": 10 }] }),
    );
    assert_eq!(calc["result"]["classification"], json!("1st"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("diplomad-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], json!(true), "{}", selected);
    assert!(workspace.join("diplomad.sqlite3").exists());

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("health", json!({})),
        ("setup.get", json!({})),
        ("universities.list", json!({})),
        ("programs.list", json!({})),
        ("modules.list", json!({})),
        ("students.list", json!({})),
        ("grades.list", json!({})),
        ("classification.calculate", json!({ "marks": [] })),
        ("classification.color", json!({ "classification": "2:1" })),
        (
            "classification.validateMarks",
            json!({ "modules": [], "marks": [] }),
        ),
        (
            "classification.validateCredits",
            json!({ "marks": [], "requiredCredits": 0 }),
        ),
        ("classification.student", json!({ "studentId": "missing" })),
        ("certificates.list", json!({})),
        ("certificates.get", json!({ "certificateId": "missing" })),
        ("certificates.verify", json!({ "qrHash": "missing" })),
        ("verifications.list", json!({})),
        ("dashboard.stats", json!({})),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("s{}", i);
        let value = request(&mut stdin, &mut reader, &id, method, params);
        assert_dispatched(&value, method);
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
