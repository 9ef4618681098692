use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use rusqlite::Connection;
use serde_json::json;

fn class_snapshot(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    Ok(json!(reports::class_snapshot(conn, &class_id)?))
}

fn class_comparison(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let rows = reports::class_comparison(conn)?;
    Ok(json!({ "classes": rows }))
}

fn school_overview(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!(reports::school_overview(conn)?))
}

fn student_profile(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!(reports::student_profile(conn, &student_id)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classSnapshot" => Some(with_db(state, req, class_snapshot)),
        "reports.classComparison" => Some(with_db(state, req, class_comparison)),
        "reports.schoolOverview" => Some(with_db(state, req, school_overview)),
        "reports.studentProfile" => Some(with_db(state, req, student_profile)),
        _ => None,
    }
}
