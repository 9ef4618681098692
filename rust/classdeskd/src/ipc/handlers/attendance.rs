use std::collections::HashSet;

use crate::calc;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_date, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use crate::store::{self, AttendanceInput};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn parse_records(params: &serde_json::Value) -> Result<Vec<AttendanceInput>, HandlerErr> {
    let Some(items) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let student_id = get_required_str(item, "studentId")
                .map_err(|_| HandlerErr::bad_params(format!("records[{}].studentId missing", i)))?;
            let raw = get_required_str(item, "status")
                .map_err(|_| HandlerErr::bad_params(format!("records[{}].status missing", i)))?;
            let status = AttendanceStatus::parse(&raw).ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("records[{}].status must be present, absent, late or excused", i),
                details: Some(json!({ "status": raw })),
            })?;
            let note = get_optional_str(item, "note")?.filter(|n| !n.trim().is_empty());
            Ok(AttendanceInput {
                student_id,
                status,
                note,
            })
        })
        .collect()
}

fn attendance_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    let records = parse_records(params)?;
    let saved = store::upsert_attendance(conn, &class_id, date, &records)?;
    info!(class_id = %class_id, %date, saved, "attendance saved");
    Ok(json!({ "saved": saved }))
}

fn attendance_for_class_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    let records = store::attendance_for_class_date(conn, &class_id, date)?;
    Ok(json!({ "records": records }))
}

fn attendance_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let records = store::attendance_for_student(conn, &student_id)?;
    Ok(json!({ "records": records }))
}

fn attendance_student_rate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let rate = store::student_attendance_rate(conn, &student_id)?;
    Ok(json!({ "rate": rate }))
}

fn attendance_daily_breakdown(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let records = store::attendance_records(conn, class_id.as_deref())?;
    Ok(json!({ "days": calc::daily_breakdown(&records) }))
}

fn attendance_day_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let today = match get_optional_str(params, "today")? {
        Some(_) => get_required_date(params, "today")?,
        None => Utc::now().date_naive(),
    };
    let records = store::attendance_records(conn, class_id.as_deref())?;
    let total_students = match class_id.as_deref() {
        Some(cid) => store::roster_ids(conn, cid)?.len(),
        None => store::list_classes(conn)?
            .iter()
            .flat_map(|c| c.student_ids.iter())
            .collect::<HashSet<_>>()
            .len(),
    };
    Ok(json!(calc::day_summary(&records, today, total_students)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.save" => Some(with_db(state, req, attendance_save)),
        "attendance.forClassDate" => Some(with_db(state, req, attendance_for_class_date)),
        "attendance.forStudent" => Some(with_db(state, req, attendance_for_student)),
        "attendance.studentRate" => Some(with_db(state, req, attendance_student_rate)),
        "attendance.dailyBreakdown" => Some(with_db(state, req, attendance_daily_breakdown)),
        "attendance.daySummary" => Some(with_db(state, req, attendance_day_summary)),
        _ => None,
    }
}
