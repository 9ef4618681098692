use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn notes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let notes = store::list_notes(conn, &student_id)?;
    Ok(json!({ "notes": notes }))
}

fn notes_append(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let content = get_required_str(params, "content")?;
    let note = store::append_note(conn, &student_id, &content, Utc::now())?;
    info!(student_id = %student_id, note_id = %note.id, "teacher note added");
    Ok(json!({ "note": note }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notes.list" => Some(with_db(state, req, notes_list)),
        "notes.append" => Some(with_db(state, req, notes_append)),
        _ => None,
    }
}
