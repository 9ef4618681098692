use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub grade_level: String,
    pub class_ids: Vec<String>,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub guardian_email: String,
    pub enrollment_date: Option<NaiveDate>,
}

impl Student {
    /// "Last, First", the roster ordering key shown in lists.
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub room: String,
    pub grade_level: String,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Quiz,
    Test,
    Project,
}

impl ExamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::Quiz => "quiz",
            ExamType::Test => "test",
            ExamType::Project => "project",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "quiz" => Some(ExamType::Quiz),
            "test" => Some(ExamType::Test),
            "project" => Some(ExamType::Project),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub max_score: f64,
    #[serde(rename = "type")]
    pub exam_type: ExamType,
    pub is_published: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "A" => Some(LetterGrade::A),
            "B" => Some(LetterGrade::B),
            "C" => Some(LetterGrade::C),
            "D" => Some(LetterGrade::D),
            "F" => Some(LetterGrade::F),
            _ => None,
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub id: String,
    pub student_id: String,
    pub exam_id: String,
    pub class_id: String,
    pub score: Option<f64>,
    pub letter_grade: Option<LetterGrade>,
    /// Last published score; unchanged by draft saves.
    pub published_score: Option<f64>,
    pub is_published: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    /// Present and late both count toward the attendance rate.
    pub fn counts_as_attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherNote {
    pub id: String,
    pub student_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    pub id: String,
    pub sender_name: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_from_teacher: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub parent_name: String,
    pub student_id: String,
    pub student_name: String,
    pub subject: String,
    pub preview: String,
    pub last_message_at: DateTime<Utc>,
    pub is_read: bool,
    pub thread: Vec<MessageItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A to-do on the teacher's dashboard, e.g. "Grade Unit 3 quizzes".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub id: String,
    pub title: String,
    /// Free-form category such as `grading` or `message`.
    #[serde(rename = "type")]
    pub item_type: String,
    pub priority: Priority,
    /// Dashboard route the item points at; empty when there is none.
    pub link: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

const PREVIEW_CHARS: usize = 60;

/// Preview shown in the inbox list: the start of the newest item.
pub fn message_preview(thread: &[MessageItem]) -> String {
    match thread.last() {
        Some(item) => {
            let head: String = item.content.chars().take(PREVIEW_CHARS).collect();
            format!("{}...", head)
        }
        None => String::new(),
    }
}

pub fn parse_date(table: &'static str, column: &'static str, raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| CoreError::malformed(table, column, raw))
}

pub fn parse_timestamp(
    table: &'static str,
    column: &'static str,
    raw: &str,
) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| CoreError::malformed(table, column, raw))
}

pub fn parse_status(table: &'static str, raw: &str) -> CoreResult<AttendanceStatus> {
    AttendanceStatus::parse(raw).ok_or_else(|| CoreError::malformed(table, "status", raw))
}

pub fn parse_exam_type(raw: &str) -> CoreResult<ExamType> {
    ExamType::parse(raw).ok_or_else(|| CoreError::malformed("exams", "exam_type", raw))
}

pub fn parse_priority(raw: &str) -> CoreResult<Priority> {
    Priority::parse(raw).ok_or_else(|| CoreError::malformed("action_items", "priority", raw))
}

pub fn parse_letter(raw: Option<&str>) -> CoreResult<Option<LetterGrade>> {
    match raw {
        None => Ok(None),
        Some(s) => LetterGrade::parse(s)
            .map(Some)
            .ok_or_else(|| CoreError::malformed("grade_entries", "letter_grade", s)),
    }
}
