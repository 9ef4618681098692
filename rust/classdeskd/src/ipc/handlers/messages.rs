use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn messages_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId")?;
    let messages = store::list_messages(conn, student_id.as_deref())?;
    Ok(json!({ "messages": messages }))
}

fn messages_unread_count(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "unread": store::unread_message_count(conn)? }))
}

fn messages_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let parent_name = get_required_str(params, "parentName")?;
    let subject = get_required_str(params, "subject")?;
    let content = get_required_str(params, "content")?;
    let message_id = store::open_thread(
        conn,
        &student_id,
        &parent_name,
        &subject,
        &content,
        Utc::now(),
    )?;
    info!(message_id = %message_id, student_id = %student_id, "parent thread opened");
    Ok(json!({ "message": store::get_message(conn, &message_id)? }))
}

fn messages_reply(
    conn: &Connection,
    params: &serde_json::Value,
    teacher_name: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let message_id = get_required_str(params, "messageId")?;
    let content = get_required_str(params, "content")?;
    store::reply_to_message(conn, &message_id, teacher_name, &content, Utc::now())?;
    info!(message_id = %message_id, "reply sent");
    Ok(json!({ "message": store::get_message(conn, &message_id)? }))
}

fn messages_mark_read(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let message_id = get_required_str(params, "messageId")?;
    store::mark_message_read(conn, &message_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.list" => Some(with_db(state, req, messages_list)),
        "messages.unreadCount" => Some(with_db(state, req, messages_unread_count)),
        "messages.open" => Some(with_db(state, req, messages_open)),
        "messages.reply" => {
            let teacher_name = state.teacher_name.clone();
            Some(with_db(state, req, |conn, params| {
                messages_reply(conn, params, &teacher_name)
            }))
        }
        "messages.markRead" => Some(with_db(state, req, messages_mark_read)),
        _ => None,
    }
}
