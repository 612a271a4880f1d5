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
    let exe = env!("CARGO_BIN_EXE_tuitiond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tuitiond");
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
    serde_json::from_str(line.trim()).expect("parse response json")
}

#[test]
fn router_dispatch_covers_every_handler_family() {
    let workspace = temp_dir("tuitiond-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    let methods_needing_workspace = [
        "students.list",
        "fees.summary",
        "attendance.summary",
        "exams.list",
        "dashboard.stats",
        "settings.get",
        "backup.export",
    ];
    for (i, method) in methods_needing_workspace.iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("pre-{}", i),
            method,
            json!({}),
        );
        assert_eq!(
            resp.pointer("/error/code").and_then(|v| v.as_str()),
            Some("no_workspace"),
            "{} before workspace.select",
            method
        );
    }

    let select = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(select.get("ok").and_then(|v| v.as_bool()), Some(true));

    let smoke_calls = [
        ("students.list", json!({})),
        ("fees.summary", json!({})),
        ("attendance.summary", json!({ "month": "2025-04" })),
        ("exams.list", json!({})),
        ("dashboard.stats", json!({})),
        ("settings.get", json!({ "key": "institute.details" })),
        (
            "backup.export",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
    ];
    for (i, (method, params)) in smoke_calls.iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("smoke-{}", i),
            method,
            params.clone(),
        );
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
    }

    let unknown = request(&mut stdin, &mut reader, "zz", "no.such.method", json!({}));
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
}
