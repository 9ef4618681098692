use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_str, get_str_list, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, NewStudent};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let students = store::list_students(conn, class_id.as_deref())?;
    Ok(json!({ "students": students }))
}

fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = store::get_student(conn, &student_id)?;
    Ok(json!({ "student": student }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let enrollment_date = match get_optional_str(params, "enrollmentDate")? {
        Some(_) => Some(get_required_date(params, "enrollmentDate")?),
        None => None,
    };
    let opt = |key: &str| -> Result<String, HandlerErr> {
        Ok(get_optional_str(params, key)?.unwrap_or_default())
    };
    let new = NewStudent {
        first_name: get_required_str(params, "firstName")?,
        last_name: get_required_str(params, "lastName")?,
        email: opt("email")?,
        grade_level: opt("gradeLevel")?,
        guardian_name: opt("guardianName")?,
        guardian_phone: opt("guardianPhone")?,
        guardian_email: opt("guardianEmail")?,
        enrollment_date,
        class_ids: get_str_list(params, "classIds")?,
    };
    let student_id = store::create_student(conn, &new)?;
    info!(student_id = %student_id, classes = new.class_ids.len(), "student created");
    Ok(json!({ "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.get" => Some(with_db(state, req, students_get)),
        "students.create" => Some(with_db(state, req, students_create)),
        _ => None,
    }
}
