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
fn parent_thread_open_reply_and_read_state() {
    let workspace = temp_dir("classdesk-messages");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--teacher-name", "Ms. Rivera"]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "firstName": "Ada", "lastName": "Lovelace", "guardianName": "Anne Byron" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let long_body = "Could you tell me how Ada has been doing with the new fractions unit lately?";
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "messages.open",
        json!({
            "studentId": student_id,
            "parentName": "Anne Byron",
            "subject": "Fractions",
            "content": long_body
        }),
    );
    let message = &opened["message"];
    let message_id = message["id"].as_str().expect("message id").to_string();
    assert_eq!(message["isRead"], json!(false));
    assert_eq!(message["studentName"], json!("Ada Lovelace"));
    let preview = message["preview"].as_str().expect("preview");
    assert!(preview.ends_with("..."));
    assert_eq!(preview.chars().count(), 63);

    let unread = request_ok(&mut stdin, &mut reader, "m2", "messages.unreadCount", json!({}));
    assert_eq!(unread["unread"], json!(1));

    let replied = request_ok(
        &mut stdin,
        &mut reader,
        "m3",
        "messages.reply",
        json!({ "messageId": message_id, "content": "She's doing well." }),
    );
    let thread = replied["message"]["thread"].as_array().expect("thread");
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[1]["senderName"], json!("Ms. Rivera"));
    assert_eq!(thread[1]["isFromTeacher"], json!(true));
    assert_eq!(replied["message"]["isRead"], json!(true));
    assert_eq!(replied["message"]["preview"], json!("She's doing well...."));

    let unread = request_ok(&mut stdin, &mut reader, "m4", "messages.unreadCount", json!({}));
    assert_eq!(unread["unread"], json!(0));

    let empty_reply = request(
        &mut stdin,
        &mut reader,
        "m5",
        "messages.reply",
        json!({ "messageId": message_id, "content": "   " }),
    );
    assert_eq!(error_code(&empty_reply), "bad_params");

    let missing = request(
        &mut stdin,
        &mut reader,
        "m6",
        "messages.markRead",
        json!({ "messageId": "nope" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "m7",
        "messages.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(listed["messages"].as_array().map(|m| m.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn notes_are_append_only_and_newest_first() {
    let workspace = temp_dir("classdesk-notes");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({ "firstName": "Alan", "lastName": "Turing" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    for (i, text) in ["First check-in.", "Second check-in."].iter().enumerate() {
        let added = request_ok(
            &mut stdin,
            &mut reader,
            &format!("n{}", i),
            "notes.append",
            json!({ "studentId": student_id, "content": text }),
        );
        assert_eq!(added["note"]["content"], json!(text));
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let notes = request_ok(
        &mut stdin,
        &mut reader,
        "l",
        "notes.list",
        json!({ "studentId": student_id }),
    );
    let notes = notes["notes"].as_array().expect("notes");
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0]["content"], json!("Second check-in."));

    let blank = request(
        &mut stdin,
        &mut reader,
        "b",
        "notes.append",
        json!({ "studentId": student_id, "content": "" }),
    );
    assert_eq!(error_code(&blank), "bad_params");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "u",
        "notes.append",
        json!({ "studentId": "ghost", "content": "hi" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn action_items_list_open_items_newest_first() {
    let workspace = temp_dir("classdesk-action-items");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let empty = request_ok(&mut stdin, &mut reader, "l0", "actionItems.list", json!({}));
    assert_eq!(empty["items"], json!([]));

    let grading = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "actionItems.create",
        json!({
            "title": "Grade Unit 3 quizzes",
            "type": "grading",
            "priority": "high",
            "link": "/grades"
        }),
    );
    let grading_id = grading["item"]["id"].as_str().expect("item id").to_string();
    assert_eq!(grading["item"]["isCompleted"], json!(false));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "actionItems.create",
        json!({ "title": "Reply to Anne Byron", "type": "message" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "l1", "actionItems.list", json!({}));
    let items = listed["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["title"], json!("Reply to Anne Byron"));
    assert_eq!(items[0]["priority"], json!("medium"));
    assert_eq!(items[0]["link"], json!(""));
    assert_eq!(items[1]["type"], json!("grading"));
    assert_eq!(items[1]["priority"], json!("high"));
    assert_eq!(items[1]["link"], json!("/grades"));

    let done = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "actionItems.complete",
        json!({ "itemId": grading_id }),
    );
    assert_eq!(done["item"]["isCompleted"], json!(true));
    let listed = request_ok(&mut stdin, &mut reader, "l2", "actionItems.list", json!({}));
    assert_eq!(listed["items"].as_array().expect("items").len(), 1);

    let bad_priority = request(
        &mut stdin,
        &mut reader,
        "b1",
        "actionItems.create",
        json!({ "title": "Something", "type": "grading", "priority": "urgent" }),
    );
    assert_eq!(error_code(&bad_priority), "bad_params");
    let missing = request(
        &mut stdin,
        &mut reader,
        "b2",
        "actionItems.complete",
        json!({ "itemId": "ghost" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
}
