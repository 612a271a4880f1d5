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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn stats_reminders_and_widgets() {
    let workspace = temp_dir("tuitiond-dashboard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // One student with an installment due in April and a birthday on the
    // 15th; one fully paid student with no reminders.
    let asha = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "name": "Asha Patil",
            "category": "School",
            "course": "SSC",
            "year": 10,
            "totalFee": 9000.0,
            "installments": 3,
            "installmentDates": ["2025-02-01", "2025-04-01", "2025-06-01"],
            "birthday": "2010-04-15",
        }),
    )
    .pointer("/student/id")
    .and_then(|v| v.as_str())
    .expect("student id")
    .to_string();

    let ravi = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "name": "Ravi Kumar",
            "category": "School",
            "course": "SSC",
            "year": 10,
            "totalFee": 5000.0,
            "installments": 1,
            "installmentDates": ["2025-04-10"],
            "birthday": "2009-11-02",
        }),
    )
    .pointer("/student/id")
    .and_then(|v| v.as_str())
    .expect("student id")
    .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.recordPayment",
        json!({
            "studentId": ravi,
            "amount": 5000.0,
            "paymentDate": "2025-03-01",
            "paymentMethod": "cash",
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.recordPayment",
        json!({
            "studentId": asha,
            "amount": 3000.0,
            "paymentDate": "2025-04-02",
            "paymentMethod": "upi",
        }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "6", "dashboard.stats", json!({}));
    assert_eq!(stats.get("totalStudents").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(stats.get("totalFees").and_then(|v| v.as_f64()), Some(14000.0));
    assert_eq!(
        stats.get("totalCollected").and_then(|v| v.as_f64()),
        Some(8000.0)
    );
    assert_eq!(
        stats.get("totalPending").and_then(|v| v.as_f64()),
        Some(6000.0)
    );

    let recent = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "dashboard.recentPayments",
        json!({ "limit": 1 }),
    );
    let payments = recent
        .get("payments")
        .and_then(|v| v.as_array())
        .expect("payments");
    assert_eq!(payments.len(), 1);
    assert_eq!(
        payments[0].get("paymentDate").and_then(|v| v.as_str()),
        Some("2025-04-02")
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exams.schedule",
        json!({
            "name": "Unit Test 1",
            "date": "2025-04-15",
            "category": "School",
            "course": "SSC",
            "year": 10,
            "subject": "Mathematics",
            "marks": 50.0,
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "exams.schedule",
        json!({
            "name": "Old Exam",
            "date": "2025-01-10",
            "category": "School",
            "course": "SSC",
            "year": 10,
            "subject": "Science",
            "marks": 50.0,
        }),
    );

    let upcoming = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "dashboard.upcomingExams",
        json!({ "today": "2025-04-15" }),
    );
    let exams = upcoming
        .get("exams")
        .and_then(|v| v.as_array())
        .expect("exams");
    assert_eq!(exams.len(), 1);
    assert_eq!(
        exams[0].get("name").and_then(|v| v.as_str()),
        Some("Unit Test 1")
    );
    assert_eq!(
        upcoming
            .pointer("/examToday/name")
            .and_then(|v| v.as_str()),
        Some("Unit Test 1")
    );

    // Asha still owes 6000 and has an installment dated in April.
    let due = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "dashboard.dueReminders",
        json!({ "today": "2025-04-01" }),
    );
    let students = due
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("Asha Patil")
    );
    assert_eq!(
        students[0].get("dueAmount").and_then(|v| v.as_f64()),
        Some(6000.0)
    );

    // No installment dates fall in July.
    let quiet = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "dashboard.dueReminders",
        json!({ "today": "2025-07-01" }),
    );
    assert_eq!(
        quiet
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // Birthday matches on month-day regardless of year.
    let birthdays = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "dashboard.birthdays",
        json!({ "today": "2026-04-15" }),
    );
    let students = birthdays
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("Asha Patil")
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn settings_roundtrip() {
    let workspace = temp_dir("tuitiond-settings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.get",
        json!({ "key": "institute.details" }),
    );
    assert!(empty.get("value").map(|v| v.is_null()).unwrap_or(false));

    let details = json!({
        "name": "SK Tutorials",
        "phone": "022-000000",
        "address": "Main Road",
    });
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "settings.set",
        json!({ "key": "institute.details", "value": details }),
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "settings.get",
        json!({ "key": "institute.details" }),
    );
    assert_eq!(
        fetched.pointer("/value/name").and_then(|v| v.as_str()),
        Some("SK Tutorials")
    );

    // Setting the same key overwrites in place.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "settings.set",
        json!({ "key": "institute.details", "value": { "name": "SK Tutorials Pvt Ltd" } }),
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "settings.get",
        json!({ "key": "institute.details" }),
    );
    assert_eq!(
        updated.pointer("/value/name").and_then(|v| v.as_str()),
        Some("SK Tutorials Pvt Ltd")
    );

    drop(stdin);
    let _ = child.wait();
}
