//! Read and write access to the workspace database.
//!
//! Rows are pulled out as plain column tuples and then parsed into the typed
//! entities in `model`; anything that does not parse is reported as
//! `CoreError::MalformedRow` instead of being defaulted.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::calc::{self, ScoredEntry};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    message_preview, parse_date, parse_exam_type, parse_letter, parse_priority, parse_status,
    parse_timestamp, ActionItem, AttendanceRecord, AttendanceStatus, Class, Exam, ExamType,
    GradeEntry, Message, MessageItem, Priority, Student, TeacherNote,
};
use crate::publish::GradebookStore;

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

fn text_values(ids: &[String]) -> Vec<Value> {
    ids.iter().map(|id| Value::Text(id.clone())).collect()
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Classes

pub struct NewClass {
    pub name: String,
    pub subject: String,
    pub room: String,
    pub grade_level: String,
}

fn class_student_ids(conn: &Connection) -> CoreResult<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT cs.class_id, cs.student_id
         FROM class_students cs
         JOIN students s ON s.id = cs.student_id
         ORDER BY s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (class_id, student_id) in rows {
        out.entry(class_id).or_default().push(student_id);
    }
    Ok(out)
}

pub fn list_classes(conn: &Connection) -> CoreResult<Vec<Class>> {
    let mut members = class_student_ids(conn)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, subject, room, grade_level FROM classes ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, name, subject, room, grade_level)| {
            let student_ids = members.remove(&id).unwrap_or_default();
            Class {
                id,
                name,
                subject,
                room,
                grade_level,
                student_ids,
            }
        })
        .collect())
}

pub fn get_class(conn: &Connection, class_id: &str) -> CoreResult<Class> {
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT name, subject, room, grade_level FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((name, subject, room, grade_level)) = row else {
        return Err(CoreError::not_found("class", class_id));
    };
    Ok(Class {
        id: class_id.to_string(),
        name,
        subject,
        room,
        grade_level,
        student_ids: roster_ids(conn, class_id)?,
    })
}

pub fn require_class(conn: &Connection, class_id: &str) -> CoreResult<()> {
    let exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(CoreError::not_found("class", class_id))
    }
}

/// Enrolled student ids for a class, in roster order.
pub fn roster_ids(conn: &Connection, class_id: &str) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT cs.student_id
         FROM class_students cs
         JOIN students s ON s.id = cs.student_id
         WHERE cs.class_id = ?
         ORDER BY s.last_name, s.first_name",
    )?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn create_class(conn: &Connection, new: &NewClass) -> CoreResult<String> {
    if new.name.trim().is_empty() {
        return Err(CoreError::Validation("class name must not be empty".into()));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, subject, room, grade_level) VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            new.name.trim(),
            &new.subject,
            &new.room,
            &new.grade_level,
        ),
    )?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Students

pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub grade_level: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub guardian_email: String,
    pub enrollment_date: Option<NaiveDate>,
    pub class_ids: Vec<String>,
}

type StudentRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
);

const STUDENT_COLUMNS: &str = "s.id, s.first_name, s.last_name, s.email, s.grade_level,
     s.guardian_name, s.guardian_phone, s.guardian_email, s.enrollment_date";

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
    ))
}

fn memberships(
    conn: &Connection,
    student_ids: &[String],
) -> CoreResult<HashMap<String, Vec<String>>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    if student_ids.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT student_id, class_id FROM class_students
         WHERE student_id IN ({})
         ORDER BY class_id",
        placeholders(student_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(student_ids)), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, class_id) in rows {
        out.entry(student_id).or_default().push(class_id);
    }
    Ok(out)
}

fn build_students(conn: &Connection, rows: Vec<StudentRow>) -> CoreResult<Vec<Student>> {
    let ids: Vec<String> = rows.iter().map(|r| r.0.clone()).collect();
    let mut classes = memberships(conn, &ids)?;
    rows.into_iter()
        .map(|row| -> CoreResult<Student> {
            let (id, first_name, last_name, email, grade_level, gname, gphone, gemail, enrolled) =
                row;
            let enrollment_date = enrolled
                .as_deref()
                .map(|d| parse_date("students", "enrollment_date", d))
                .transpose()?;
            let class_ids = classes.remove(&id).unwrap_or_default();
            Ok(Student {
                id,
                first_name,
                last_name,
                email,
                grade_level,
                class_ids,
                guardian_name: gname,
                guardian_phone: gphone,
                guardian_email: gemail,
                enrollment_date,
            })
        })
        .collect()
}

pub fn list_students(conn: &Connection, class_id: Option<&str>) -> CoreResult<Vec<Student>> {
    let rows: Vec<StudentRow> = match class_id {
        Some(cid) => {
            require_class(conn, cid)?;
            let sql = format!(
                "SELECT {STUDENT_COLUMNS}
                 FROM students s
                 JOIN class_students cs ON cs.student_id = s.id
                 WHERE cs.class_id = ?
                 ORDER BY s.last_name, s.first_name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([cid], student_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!(
                "SELECT {STUDENT_COLUMNS} FROM students s ORDER BY s.last_name, s.first_name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], student_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    build_students(conn, rows)
}

pub fn get_student(conn: &Connection, student_id: &str) -> CoreResult<Student> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students s WHERE s.id = ?");
    let row = conn.query_row(&sql, [student_id], student_row).optional()?;
    let Some(row) = row else {
        return Err(CoreError::not_found("student", student_id));
    };
    build_students(conn, vec![row])?
        .pop()
        .ok_or_else(|| CoreError::not_found("student", student_id))
}

pub fn require_student(conn: &Connection, student_id: &str) -> CoreResult<()> {
    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(CoreError::not_found("student", student_id))
    }
}

pub fn create_student(conn: &Connection, new: &NewStudent) -> CoreResult<String> {
    if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
        return Err(CoreError::Validation(
            "firstName and lastName must not be empty".into(),
        ));
    }
    for cid in &new.class_ids {
        require_class(conn, cid)?;
    }
    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO students(id, first_name, last_name, email, grade_level,
            guardian_name, guardian_phone, guardian_email, enrollment_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            new.first_name.trim(),
            new.last_name.trim(),
            &new.email,
            &new.grade_level,
            &new.guardian_name,
            &new.guardian_phone,
            &new.guardian_email,
            new.enrollment_date.map(|d| d.to_string()),
        ),
    )?;
    for cid in &new.class_ids {
        tx.execute(
            "INSERT OR IGNORE INTO class_students(class_id, student_id) VALUES(?, ?)",
            (cid, &id),
        )?;
    }
    tx.commit()?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Exams

pub struct NewExam {
    pub class_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub max_score: f64,
    pub exam_type: ExamType,
}

type ExamRow = (String, String, String, String, f64, String, i64);

fn exam_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExamRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn parse_exam(row: ExamRow) -> CoreResult<Exam> {
    let (id, class_id, name, date, max_score, exam_type, is_published) = row;
    if !(max_score > 0.0) {
        return Err(CoreError::malformed(
            "exams",
            "max_score",
            max_score.to_string(),
        ));
    }
    Ok(Exam {
        id,
        class_id,
        name,
        date: parse_date("exams", "date", &date)?,
        max_score,
        exam_type: parse_exam_type(&exam_type)?,
        is_published: is_published != 0,
    })
}

pub fn list_exams(conn: &Connection, class_id: Option<&str>) -> CoreResult<Vec<Exam>> {
    let rows: Vec<ExamRow> = match class_id {
        Some(cid) => {
            require_class(conn, cid)?;
            let mut stmt = conn.prepare(
                "SELECT id, class_id, name, date, max_score, exam_type, is_published
                 FROM exams WHERE class_id = ? ORDER BY date DESC, name",
            )?;
            let rows = stmt.query_map([cid], exam_row)?.collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, class_id, name, date, max_score, exam_type, is_published
                 FROM exams ORDER BY date DESC, name",
            )?;
            let rows = stmt.query_map([], exam_row)?.collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    rows.into_iter().map(parse_exam).collect()
}

pub fn get_exam(conn: &Connection, exam_id: &str) -> CoreResult<Exam> {
    let row = conn
        .query_row(
            "SELECT id, class_id, name, date, max_score, exam_type, is_published
             FROM exams WHERE id = ?",
            [exam_id],
            exam_row,
        )
        .optional()?;
    match row {
        Some(row) => parse_exam(row),
        None => Err(CoreError::not_found("exam", exam_id)),
    }
}

pub fn create_exam(conn: &Connection, new: &NewExam) -> CoreResult<String> {
    if new.name.trim().is_empty() {
        return Err(CoreError::Validation("exam name must not be empty".into()));
    }
    if !new.max_score.is_finite() || new.max_score <= 0.0 {
        return Err(CoreError::Validation("maxScore must be > 0".into()));
    }
    require_class(conn, &new.class_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, class_id, name, date, max_score, exam_type, is_published)
         VALUES(?, ?, ?, ?, ?, ?, 0)",
        (
            &id,
            &new.class_id,
            new.name.trim(),
            new.date.to_string(),
            new.max_score,
            new.exam_type.as_str(),
        ),
    )?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Grade entries

type EntryRow = (
    String,
    String,
    String,
    String,
    Option<f64>,
    Option<String>,
    Option<f64>,
    i64,
);

fn entry_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
    ))
}

fn parse_entry(row: EntryRow) -> CoreResult<GradeEntry> {
    let (id, student_id, exam_id, class_id, score, letter, published_score, is_published) = row;
    Ok(GradeEntry {
        id,
        student_id,
        exam_id,
        class_id,
        score,
        letter_grade: parse_letter(letter.as_deref())?,
        published_score,
        is_published: is_published != 0,
    })
}

pub fn entries_for_exam(conn: &Connection, exam_id: &str) -> CoreResult<Vec<GradeEntry>> {
    get_exam(conn, exam_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, student_id, exam_id, class_id, score, letter_grade, published_score,
                is_published
         FROM grade_entries WHERE exam_id = ?",
    )?;
    let rows = stmt
        .query_map([exam_id], entry_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_entry).collect()
}

pub fn entries_for_student(conn: &Connection, student_id: &str) -> CoreResult<Vec<GradeEntry>> {
    require_student(conn, student_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, student_id, exam_id, class_id, score, letter_grade, published_score,
                is_published
         FROM grade_entries WHERE student_id = ?",
    )?;
    let rows = stmt
        .query_map([student_id], entry_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_entry).collect()
}

/// Guardian-visible scores (the published snapshot on published exams) for a
/// set of students in one query, keyed by student id. Students with nothing
/// published are absent from the map.
pub fn published_scores_for_students(
    conn: &Connection,
    student_ids: &[String],
) -> CoreResult<HashMap<String, Vec<ScoredEntry>>> {
    let mut out: HashMap<String, Vec<ScoredEntry>> = HashMap::new();
    if student_ids.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT g.student_id, g.class_id, g.published_score, e.max_score
         FROM grade_entries g
         JOIN exams e ON e.id = g.exam_id
         WHERE e.is_published = 1
           AND g.published_score IS NOT NULL
           AND g.student_id IN ({})",
        placeholders(student_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(student_ids)), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, class_id, score, max_score) in rows {
        out.entry(student_id).or_default().push(ScoredEntry {
            class_id,
            score,
            max_score,
        });
    }
    Ok(out)
}

pub fn student_average(
    conn: &Connection,
    student_id: &str,
    class_id: Option<&str>,
) -> CoreResult<Option<i64>> {
    require_student(conn, student_id)?;
    if let Some(cid) = class_id {
        require_class(conn, cid)?;
    }
    let ids = vec![student_id.to_string()];
    let scores = published_scores_for_students(conn, &ids)?;
    let entries = scores.get(student_id).map(Vec::as_slice).unwrap_or(&[]);
    Ok(calc::average_percent(entries, class_id))
}

/// Full-state sync of an exam's scores: every draft score is upserted and any
/// existing entry not in the draft is blanked. Only the working score is
/// written: guardians keep seeing `published_score` until the next
/// `mark_exam_published`. Entries whose score changed lose their published
/// flag so pending edits can be detected.
pub fn sync_exam_scores(
    conn: &Connection,
    exam: &Exam,
    scores: &BTreeMap<String, Option<f64>>,
) -> CoreResult<usize> {
    let tx = conn.unchecked_transaction()?;

    let keep: Vec<String> = scores.keys().cloned().collect();
    if keep.is_empty() {
        tx.execute(
            "UPDATE grade_entries
             SET score = NULL,
                 letter_grade = NULL,
                 is_published = CASE WHEN score IS NULL THEN is_published ELSE 0 END
             WHERE exam_id = ?",
            [&exam.id],
        )?;
    } else {
        let sql = format!(
            "UPDATE grade_entries
             SET score = NULL,
                 letter_grade = NULL,
                 is_published = CASE WHEN score IS NULL THEN is_published ELSE 0 END
             WHERE exam_id = ? AND student_id NOT IN ({})",
            placeholders(keep.len())
        );
        let mut bind: Vec<Value> = Vec::with_capacity(keep.len() + 1);
        bind.push(Value::Text(exam.id.clone()));
        bind.extend(text_values(&keep));
        tx.execute(&sql, params_from_iter(bind))?;
    }

    for (student_id, score) in scores {
        let letter = calc::entry_letter(*score, exam.max_score).map(|l| l.as_str());
        tx.execute(
            "INSERT INTO grade_entries(
                id, student_id, exam_id, class_id, score, letter_grade, is_published)
             VALUES(?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(student_id, exam_id) DO UPDATE SET
               class_id = excluded.class_id,
               score = excluded.score,
               letter_grade = excluded.letter_grade,
               is_published = CASE
                 WHEN grade_entries.score IS excluded.score THEN grade_entries.is_published
                 ELSE 0
               END",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &exam.id,
                &exam.class_id,
                *score,
                letter,
            ),
        )?;
    }

    tx.commit()?;
    Ok(scores.len())
}

/// Sets the exam's published flag and copies every entry's working score to
/// its published score. Returns the number of entries touched.
pub fn mark_exam_published(conn: &Connection, exam_id: &str) -> CoreResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute("UPDATE exams SET is_published = 1 WHERE id = ?", [exam_id])?;
    if updated == 0 {
        return Err(CoreError::not_found("exam", exam_id));
    }
    let entries = tx.execute(
        "UPDATE grade_entries
         SET published_score = score,
             is_published = 1
         WHERE exam_id = ?",
        [exam_id],
    )?;
    tx.commit()?;
    Ok(entries)
}

impl GradebookStore for Connection {
    fn sync_exam_scores(
        &self,
        exam: &Exam,
        scores: &BTreeMap<String, Option<f64>>,
    ) -> CoreResult<usize> {
        sync_exam_scores(self, exam, scores)
    }

    fn mark_exam_published(&self, exam_id: &str) -> CoreResult<usize> {
        mark_exam_published(self, exam_id)
    }
}

/// Every published exam of a class (newest first) with its entered scores.
/// Exams nobody has a score on come back with an empty list.
pub fn published_exam_scores(
    conn: &Connection,
    class_id: &str,
) -> CoreResult<Vec<(Exam, Vec<f64>)>> {
    let exams: Vec<Exam> = list_exams(conn, Some(class_id))?
        .into_iter()
        .filter(|e| e.is_published)
        .collect();
    let mut stmt = conn.prepare(
        "SELECT g.exam_id, g.published_score
         FROM grade_entries g
         JOIN exams e ON e.id = g.exam_id
         WHERE e.class_id = ? AND e.is_published = 1 AND g.published_score IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([class_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut by_exam: HashMap<String, Vec<f64>> = HashMap::new();
    for (exam_id, score) in rows {
        by_exam.entry(exam_id).or_default().push(score);
    }
    Ok(exams
        .into_iter()
        .map(|e| {
            let scores = by_exam.remove(&e.id).unwrap_or_default();
            (e, scores)
        })
        .collect())
}

/// A published score together with the exam it belongs to.
#[derive(Debug, Clone)]
pub struct PublishedScore {
    pub exam: Exam,
    pub score: f64,
}

/// Most recent published scores for a student, newest exam first.
pub fn recent_published_scores(
    conn: &Connection,
    student_id: &str,
    limit: usize,
) -> CoreResult<Vec<PublishedScore>> {
    require_student(conn, student_id)?;
    let mut stmt = conn.prepare(
        "SELECT e.id, e.class_id, e.name, e.date, e.max_score, e.exam_type, g.published_score
         FROM grade_entries g
         JOIN exams e ON e.id = g.exam_id
         WHERE g.student_id = ?
           AND e.is_published = 1
           AND g.published_score IS NOT NULL
         ORDER BY e.date DESC, e.name
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map((student_id, limit as i64), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, f64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|row| -> CoreResult<PublishedScore> {
            let (id, class_id, name, date, max_score, exam_type, score) = row;
            Ok(PublishedScore {
                exam: Exam {
                    id,
                    class_id,
                    name,
                    date: parse_date("exams", "date", &date)?,
                    max_score,
                    exam_type: parse_exam_type(&exam_type)?,
                    is_published: true,
                },
                score,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Attendance

#[derive(Debug, Clone)]
pub struct AttendanceInput {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub note: Option<String>,
}

type AttendanceRow = (String, String, String, String, String, Option<String>);

fn attendance_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
}

fn parse_attendance(row: AttendanceRow) -> CoreResult<AttendanceRecord> {
    let (id, student_id, class_id, date, status, note) = row;
    Ok(AttendanceRecord {
        id,
        student_id,
        class_id,
        date: parse_date("attendance_records", "date", &date)?,
        status: parse_status("attendance_records", &status)?,
        note,
    })
}

/// Upserts one day's marks for a class keyed by (student, class, date). All
/// students must be enrolled in the class; nothing is written otherwise.
pub fn upsert_attendance(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    records: &[AttendanceInput],
) -> CoreResult<usize> {
    require_class(conn, class_id)?;
    let enrolled: HashSet<String> = roster_ids(conn, class_id)?.into_iter().collect();
    if let Some(missing) = records.iter().find(|r| !enrolled.contains(&r.student_id)) {
        return Err(CoreError::not_found("student", missing.student_id.clone()));
    }

    let day = date.to_string();
    let tx = conn.unchecked_transaction()?;
    for r in records {
        tx.execute(
            "INSERT INTO attendance_records(id, student_id, class_id, date, status, note)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, class_id, date) DO UPDATE SET
               status = excluded.status,
               note = excluded.note",
            (
                Uuid::new_v4().to_string(),
                &r.student_id,
                class_id,
                &day,
                r.status.as_str(),
                r.note.as_deref(),
            ),
        )?;
    }
    tx.commit()?;
    Ok(records.len())
}

pub fn attendance_for_class_date(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
) -> CoreResult<Vec<AttendanceRecord>> {
    require_class(conn, class_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, student_id, class_id, date, status, note
         FROM attendance_records WHERE class_id = ? AND date = ?",
    )?;
    let rows = stmt
        .query_map((class_id, date.to_string()), attendance_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_attendance).collect()
}

/// Newest first.
pub fn attendance_for_student(
    conn: &Connection,
    student_id: &str,
) -> CoreResult<Vec<AttendanceRecord>> {
    require_student(conn, student_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, student_id, class_id, date, status, note
         FROM attendance_records WHERE student_id = ? ORDER BY date DESC",
    )?;
    let rows = stmt
        .query_map([student_id], attendance_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_attendance).collect()
}

/// Oldest first; optionally limited to one class.
pub fn attendance_records(
    conn: &Connection,
    class_id: Option<&str>,
) -> CoreResult<Vec<AttendanceRecord>> {
    let rows = match class_id {
        Some(cid) => {
            require_class(conn, cid)?;
            let mut stmt = conn.prepare(
                "SELECT id, student_id, class_id, date, status, note
                 FROM attendance_records WHERE class_id = ? ORDER BY date",
            )?;
            let rows = stmt
                .query_map([cid], attendance_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, student_id, class_id, date, status, note
                 FROM attendance_records ORDER BY date",
            )?;
            let rows = stmt
                .query_map([], attendance_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    rows.into_iter().map(parse_attendance).collect()
}

/// All attendance statuses for a set of students, across every class.
pub fn attendance_statuses_for_students(
    conn: &Connection,
    student_ids: &[String],
) -> CoreResult<HashMap<String, Vec<AttendanceStatus>>> {
    let mut out: HashMap<String, Vec<AttendanceStatus>> = HashMap::new();
    if student_ids.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT student_id, status FROM attendance_records WHERE student_id IN ({})",
        placeholders(student_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(student_ids)), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, status) in rows {
        let status = parse_status("attendance_records", &status)?;
        out.entry(student_id).or_default().push(status);
    }
    Ok(out)
}

pub fn student_attendance_rate(conn: &Connection, student_id: &str) -> CoreResult<i64> {
    let records = attendance_for_student(conn, student_id)?;
    Ok(calc::attendance_rate(records.iter().map(|r| r.status)))
}

// ---------------------------------------------------------------------------
// Teacher notes

/// Newest first.
pub fn list_notes(conn: &Connection, student_id: &str) -> CoreResult<Vec<TeacherNote>> {
    require_student(conn, student_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, student_id, content, created_at
         FROM teacher_notes WHERE student_id = ? ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, student_id, content, created_at)| -> CoreResult<TeacherNote> {
            Ok(TeacherNote {
                id,
                student_id,
                content,
                created_at: parse_timestamp("teacher_notes", "created_at", &created_at)?,
            })
        })
        .collect()
}

pub fn append_note(
    conn: &Connection,
    student_id: &str,
    content: &str,
    now: DateTime<Utc>,
) -> CoreResult<TeacherNote> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CoreError::Validation("note content must not be empty".into()));
    }
    require_student(conn, student_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teacher_notes(id, student_id, content, created_at) VALUES(?, ?, ?, ?)",
        (&id, student_id, content, format_timestamp(now)),
    )?;
    Ok(TeacherNote {
        id,
        student_id: student_id.to_string(),
        content: content.to_string(),
        created_at: now,
    })
}

// ---------------------------------------------------------------------------
// Action items

type ActionItemRow = (String, String, String, String, String, i64, String);

fn action_item_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ActionItemRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn parse_action_item(row: ActionItemRow) -> CoreResult<ActionItem> {
    let (id, title, item_type, priority, link, is_completed, created_at) = row;
    Ok(ActionItem {
        id,
        title,
        item_type,
        priority: parse_priority(&priority)?,
        link,
        is_completed: is_completed != 0,
        created_at: parse_timestamp("action_items", "created_at", &created_at)?,
    })
}

/// Open items only, newest first.
pub fn list_action_items(conn: &Connection) -> CoreResult<Vec<ActionItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, item_type, priority, link, is_completed, created_at
         FROM action_items
         WHERE is_completed = 0
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([], action_item_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_action_item).collect()
}

pub struct NewActionItem {
    pub title: String,
    pub item_type: String,
    pub priority: Priority,
    pub link: String,
}

pub fn create_action_item(
    conn: &Connection,
    item: &NewActionItem,
    now: DateTime<Utc>,
) -> CoreResult<ActionItem> {
    let title = item.title.trim();
    if title.is_empty() {
        return Err(CoreError::Validation("action item title must not be empty".into()));
    }
    let item_type = item.item_type.trim();
    if item_type.is_empty() {
        return Err(CoreError::Validation("action item type must not be empty".into()));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO action_items(id, title, item_type, priority, link, is_completed, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (
            &id,
            title,
            item_type,
            item.priority.as_str(),
            item.link.trim(),
            format_timestamp(now),
        ),
    )?;
    Ok(ActionItem {
        id,
        title: title.to_string(),
        item_type: item_type.to_string(),
        priority: item.priority,
        link: item.link.trim().to_string(),
        is_completed: false,
        created_at: now,
    })
}

/// Marks the item done. Completing an already completed item is a no-op.
pub fn complete_action_item(conn: &Connection, id: &str) -> CoreResult<ActionItem> {
    let updated = conn.execute("UPDATE action_items SET is_completed = 1 WHERE id = ?", [id])?;
    if updated == 0 {
        return Err(CoreError::not_found("action item", id));
    }
    let row = conn.query_row(
        "SELECT id, title, item_type, priority, link, is_completed, created_at
         FROM action_items WHERE id = ?",
        [id],
        action_item_row,
    )?;
    parse_action_item(row)
}

// ---------------------------------------------------------------------------
// Parent messages

fn message_items(
    conn: &Connection,
    message_ids: &[String],
) -> CoreResult<HashMap<String, Vec<MessageItem>>> {
    let mut out: HashMap<String, Vec<MessageItem>> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        "SELECT message_id, id, sender_name, content, sent_at, is_from_teacher
         FROM message_items WHERE message_id IN ({})
         ORDER BY sent_at, rowid",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(message_ids)), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (message_id, id, sender_name, content, sent_at, from_teacher) in rows {
        out.entry(message_id).or_default().push(MessageItem {
            id,
            sender_name,
            content,
            sent_at: parse_timestamp("message_items", "sent_at", &sent_at)?,
            is_from_teacher: from_teacher != 0,
        });
    }
    Ok(out)
}

type MessageRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    i64,
    String,
);

fn message_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
    ))
}

/// Threads ordered by latest activity, newest first.
pub fn list_messages(conn: &Connection, student_id: Option<&str>) -> CoreResult<Vec<Message>> {
    let base = "SELECT m.id, m.parent_name, m.student_id, s.first_name, s.last_name,
                       m.subject, m.is_read, m.last_message_at
                FROM messages m
                LEFT JOIN students s ON s.id = m.student_id";
    let rows = match student_id {
        Some(sid) => {
            require_student(conn, sid)?;
            let mut stmt = conn.prepare(&format!(
                "{base} WHERE m.student_id = ? ORDER BY m.last_message_at DESC"
            ))?;
            let rows = stmt.query_map([sid], message_row)?.collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!("{base} ORDER BY m.last_message_at DESC"))?;
            let rows = stmt.query_map([], message_row)?.collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let ids: Vec<String> = rows.iter().map(|r| r.0.clone()).collect();
    let mut items = message_items(conn, &ids)?;
    rows.into_iter()
        .map(|row| -> CoreResult<Message> {
            let (id, parent_name, student_id, first, last, subject, is_read, last_at) = row;
            let thread = items.remove(&id).unwrap_or_default();
            let student_name = match (first, last) {
                (Some(f), Some(l)) => format!("{} {}", f, l),
                _ => String::new(),
            };
            Ok(Message {
                preview: message_preview(&thread),
                id,
                parent_name,
                student_id,
                student_name,
                subject,
                last_message_at: parse_timestamp("messages", "last_message_at", &last_at)?,
                is_read: is_read != 0,
                thread,
            })
        })
        .collect()
}

pub fn get_message(conn: &Connection, message_id: &str) -> CoreResult<Message> {
    let student_id: Option<String> = conn
        .query_row(
            "SELECT student_id FROM messages WHERE id = ?",
            [message_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(student_id) = student_id else {
        return Err(CoreError::not_found("message", message_id));
    };
    list_messages(conn, Some(&student_id))?
        .into_iter()
        .find(|m| m.id == message_id)
        .ok_or_else(|| CoreError::not_found("message", message_id))
}

pub fn unread_message_count(conn: &Connection) -> CoreResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM messages WHERE is_read = 0", [], |r| {
        r.get(0)
    })?)
}

/// Opens a parent thread with the parent's first message; unread until the
/// teacher looks at it.
pub fn open_thread(
    conn: &Connection,
    student_id: &str,
    parent_name: &str,
    subject: &str,
    content: &str,
    now: DateTime<Utc>,
) -> CoreResult<String> {
    if content.trim().is_empty() {
        return Err(CoreError::Validation("message content must not be empty".into()));
    }
    require_student(conn, student_id)?;
    let id = Uuid::new_v4().to_string();
    let ts = format_timestamp(now);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO messages(id, student_id, parent_name, subject, is_read, last_message_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (&id, student_id, parent_name, subject, &ts),
    )?;
    tx.execute(
        "INSERT INTO message_items(id, message_id, sender_name, content, sent_at, is_from_teacher)
         VALUES(?, ?, ?, ?, ?, 0)",
        (Uuid::new_v4().to_string(), &id, parent_name, content, &ts),
    )?;
    tx.commit()?;
    Ok(id)
}

pub fn reply_to_message(
    conn: &Connection,
    message_id: &str,
    sender_name: &str,
    content: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if content.trim().is_empty() {
        return Err(CoreError::Validation("reply content must not be empty".into()));
    }
    let ts = format_timestamp(now);
    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute(
        "UPDATE messages SET last_message_at = ?, is_read = 1 WHERE id = ?",
        (&ts, message_id),
    )?;
    if updated == 0 {
        return Err(CoreError::not_found("message", message_id));
    }
    tx.execute(
        "INSERT INTO message_items(id, message_id, sender_name, content, sent_at, is_from_teacher)
         VALUES(?, ?, ?, ?, ?, 1)",
        (Uuid::new_v4().to_string(), message_id, sender_name, content, &ts),
    )?;
    tx.commit()?;
    Ok(())
}

pub fn mark_message_read(conn: &Connection, message_id: &str) -> CoreResult<()> {
    let updated = conn.execute("UPDATE messages SET is_read = 1 WHERE id = ?", [message_id])?;
    if updated == 0 {
        return Err(CoreError::not_found("message", message_id));
    }
    Ok(())
}
