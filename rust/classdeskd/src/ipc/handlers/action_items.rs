use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::Priority;
use crate::store::{self, NewActionItem};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn action_items_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let items = store::list_action_items(conn)?;
    Ok(json!({ "items": items }))
}

fn action_items_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let priority = match get_optional_str(params, "priority")? {
        None => Priority::Medium,
        Some(raw) => Priority::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params(format!("priority must be high, medium or low, got {:?}", raw))
        })?,
    };
    let new = NewActionItem {
        title: get_required_str(params, "title")?,
        item_type: get_required_str(params, "type")?,
        priority,
        link: get_optional_str(params, "link")?.unwrap_or_default(),
    };
    let item = store::create_action_item(conn, &new, Utc::now())?;
    info!(item_id = %item.id, priority = item.priority.as_str(), "action item created");
    Ok(json!({ "item": item }))
}

fn action_items_complete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let item_id = get_required_str(params, "itemId")?;
    let item = store::complete_action_item(conn, &item_id)?;
    info!(item_id = %item.id, "action item completed");
    Ok(json!({ "item": item }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "actionItems.list" => Some(with_db(state, req, action_items_list)),
        "actionItems.create" => Some(with_db(state, req, action_items_create)),
        "actionItems.complete" => Some(with_db(state, req, action_items_complete)),
        _ => None,
    }
}
