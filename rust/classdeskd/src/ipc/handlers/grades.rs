use std::collections::HashMap;

use crate::calc;
use crate::error::CoreError;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, get_score, with_db};
use crate::ipc::types::{AppState, Request};
use crate::publish::GradeDraft;
use crate::reports;
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn entries_for_exam(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let entries = store::entries_for_exam(conn, &exam_id)?;
    Ok(json!({ "entries": entries }))
}

fn entries_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let entries = store::entries_for_student(conn, &student_id)?;
    Ok(json!({ "entries": entries }))
}

fn student_average(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_optional_str(params, "classId")?;
    let average = store::student_average(conn, &student_id, class_id.as_deref())?;
    Ok(json!({
        "average": average,
        "letterGrade": average.map(calc::letter_grade),
    }))
}

fn distribution(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let distribution = reports::class_distribution(conn, &class_id)?;
    Ok(json!({ "distribution": distribution, "graded": distribution.total() }))
}

fn exam_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let exams = reports::exam_stats_for_class(conn, &class_id)?;
    Ok(json!({ "exams": exams }))
}

type Drafts = HashMap<String, GradeDraft>;

/// Loads the exam's persisted scores into a fresh draft, replacing any draft
/// already open for it.
fn draft_open(
    conn: &Connection,
    drafts: &mut Drafts,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let exam = store::get_exam(conn, &exam_id)?;
    let roster = store::roster_ids(conn, &exam.class_id)?;
    let entries = store::entries_for_exam(conn, &exam_id)?;
    let draft = GradeDraft::load(exam, &roster, &entries);
    let view = draft.view();
    drafts.insert(exam_id, draft);
    Ok(json!({ "draft": view }))
}

fn open_draft<'a>(
    drafts: &'a mut Drafts,
    params: &serde_json::Value,
) -> Result<&'a mut GradeDraft, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    drafts
        .get_mut(&exam_id)
        .ok_or_else(|| HandlerErr::from(CoreError::not_found("draft", exam_id)))
}

fn draft_get(
    _conn: &Connection,
    drafts: &mut Drafts,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let draft = open_draft(drafts, params)?;
    Ok(json!({ "draft": draft.view() }))
}

fn set_score(
    _conn: &Connection,
    drafts: &mut Drafts,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let score = get_score(params, "score")?;
    let draft = open_draft(drafts, params)?;
    draft.set_score(&student_id, score)?;
    Ok(json!({ "draft": draft.view() }))
}

fn save_draft(
    conn: &Connection,
    drafts: &mut Drafts,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let draft = open_draft(drafts, params)?;
    draft.save_draft(conn)?;
    Ok(json!({ "draft": draft.view() }))
}

fn publish(
    conn: &Connection,
    drafts: &mut Drafts,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let draft = open_draft(drafts, params)?;
    draft.publish(conn)?;
    info!(exam_id = %draft.exam().id, "grades published to guardians");
    Ok(json!({ "draft": draft.view() }))
}

fn with_drafts<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(
        &Connection,
        &mut Drafts,
        &serde_json::Value,
    ) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &mut state.drafts, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.entriesForExam" => Some(with_db(state, req, entries_for_exam)),
        "grades.entriesForStudent" => Some(with_db(state, req, entries_for_student)),
        "grades.studentAverage" => Some(with_db(state, req, student_average)),
        "grades.distribution" => Some(with_db(state, req, distribution)),
        "grades.examStats" => Some(with_db(state, req, exam_stats)),
        "grades.draftOpen" => Some(with_drafts(state, req, draft_open)),
        "grades.draftGet" => Some(with_drafts(state, req, draft_get)),
        "grades.setScore" => Some(with_drafts(state, req, set_score)),
        "grades.saveDraft" => Some(with_drafts(state, req, save_draft)),
        "grades.publish" => Some(with_drafts(state, req, publish)),
        _ => None,
    }
}
