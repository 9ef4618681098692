use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_f64, get_required_str, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::ExamType;
use crate::store::{self, NewClass, NewExam};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn classes_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classes = store::list_classes(conn)?;
    Ok(json!({ "classes": classes }))
}

fn classes_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = store::get_class(conn, &class_id)?;
    Ok(json!({ "class": class }))
}

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let new = NewClass {
        name: get_required_str(params, "name")?,
        subject: get_optional_str(params, "subject")?.unwrap_or_default(),
        room: get_optional_str(params, "room")?.unwrap_or_default(),
        grade_level: get_optional_str(params, "gradeLevel")?.unwrap_or_default(),
    };
    let class_id = store::create_class(conn, &new)?;
    info!(class_id = %class_id, name = %new.name.trim(), "class created");
    Ok(json!({ "classId": class_id }))
}

fn exams_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let exams = store::list_exams(conn, class_id.as_deref())?;
    Ok(json!({ "exams": exams }))
}

fn exams_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw_type = get_required_str(params, "type")?;
    let exam_type = ExamType::parse(&raw_type).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "type must be quiz, test or project, got {:?}",
            raw_type
        ))
    })?;
    let new = NewExam {
        class_id: get_required_str(params, "classId")?,
        name: get_required_str(params, "name")?,
        date: get_required_date(params, "date")?,
        max_score: get_required_f64(params, "maxScore")?,
        exam_type,
    };
    let exam_id = store::create_exam(conn, &new)?;
    info!(exam_id = %exam_id, class_id = %new.class_id, "exam created");
    Ok(json!({ "examId": exam_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_db(state, req, classes_list)),
        "classes.get" => Some(with_db(state, req, classes_get)),
        "classes.create" => Some(with_db(state, req, classes_create)),
        "exams.list" => Some(with_db(state, req, exams_list)),
        "exams.create" => Some(with_db(state, req, exams_create)),
        _ => None,
    }
}
