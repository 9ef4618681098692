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

fn spawn_sidecar(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_classdeskd");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("CLASSDESK_WORKSPACE")
        .env_remove("CLASSDESK_TEACHER_NAME")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn classdeskd");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn attendance_save_rates_and_breakdowns() {
    let workspace = temp_dir("classdesk-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "Homeroom" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let a = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "firstName": "Ana", "lastName": "Diaz", "classIds": [class_id] }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let b = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({ "firstName": "Ben", "lastName": "Ng", "classIds": [class_id] }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    // No history yet: a full rate, not zero.
    let rate = request_ok(
        &mut stdin,
        &mut reader,
        "r0",
        "attendance.studentRate",
        json!({ "studentId": a }),
    );
    assert_eq!(rate["rate"], json!(100));

    let days = [
        ("2024-09-02", "present", "absent"),
        ("2024-09-03", "late", "absent"),
        ("2024-09-04", "absent", "excused"),
        ("2024-09-05", "present", "present"),
    ];
    for (i, (date, sa, sb)) in days.iter().enumerate() {
        let saved = request_ok(
            &mut stdin,
            &mut reader,
            &format!("d{}", i),
            "attendance.save",
            json!({
                "classId": class_id,
                "date": date,
                "records": [
                    { "studentId": a, "status": sa },
                    { "studentId": b, "status": sb, "note": "called home" },
                ],
            }),
        );
        assert_eq!(saved["saved"], json!(2));
    }

    // Re-saving a day replaces the mark rather than adding one.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d9",
        "attendance.save",
        json!({
            "classId": class_id,
            "date": "2024-09-04",
            "records": [{ "studentId": a, "status": "Present" }]
        }),
    );

    let rate_a = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "attendance.studentRate",
        json!({ "studentId": a }),
    );
    assert_eq!(rate_a["rate"], json!(100));
    let rate_b = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "attendance.studentRate",
        json!({ "studentId": b }),
    );
    assert_eq!(rate_b["rate"], json!(25));

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "q1",
        "attendance.forClassDate",
        json!({ "classId": class_id, "date": "2024-09-04" }),
    );
    assert_eq!(day["records"].as_array().map(|r| r.len()), Some(2));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "q2",
        "attendance.forStudent",
        json!({ "studentId": b }),
    );
    assert_eq!(history["records"][0]["date"], json!("2024-09-05"));
    assert_eq!(history["records"][0]["note"], json!("called home"));

    let breakdown = request_ok(
        &mut stdin,
        &mut reader,
        "q3",
        "attendance.dailyBreakdown",
        json!({ "classId": class_id }),
    );
    let rows = breakdown["days"].as_array().expect("days");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["date"], json!("2024-09-02"));
    assert_eq!(rows[0]["present"], json!(1));
    assert_eq!(rows[0]["absent"], json!(1));
    assert_eq!(rows[2]["present"], json!(1));
    assert_eq!(rows[2]["excused"], json!(1));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "q4",
        "attendance.daySummary",
        json!({ "today": "2024-10-01" }),
    );
    assert_eq!(summary["date"], json!("2024-09-05"));
    assert_eq!(summary["present"], json!(2));
    assert_eq!(summary["total"], json!(2));
    assert_eq!(summary["totalStudents"], json!(2));
    assert_eq!(summary["presentRate"], json!(100));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn attendance_rejects_bad_status_and_unenrolled_students() {
    let workspace = temp_dir("classdesk-attendance-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "Homeroom" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "firstName": "Oz", "lastName": "Out" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.save",
        json!({
            "classId": class_id,
            "date": "2024-09-02",
            "records": [{ "studentId": outsider, "status": "tardy" }]
        }),
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.save",
        json!({ "classId": class_id, "date": "Sept 2", "records": [] }),
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    let unenrolled = request(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.save",
        json!({
            "classId": class_id,
            "date": "2024-09-02",
            "records": [{ "studentId": outsider, "status": "present" }]
        }),
    );
    assert_eq!(error_code(&unenrolled), "not_found");

    let unknown_class = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.dailyBreakdown",
        json!({ "classId": "missing" }),
    );
    assert_eq!(error_code(&unknown_class), "not_found");

    drop(stdin);
    let _ = child.wait();
}
