//! Dashboard rollups: class snapshot, per-class comparison, school overview,
//! exam statistics and the student profile.
//!
//! Every rollup fetches its scope's scores and attendance once and then runs
//! the pure aggregators in `calc` over the snapshot.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::calc::{
    self, CohortSummary, ExamScoreStats, GradeDistribution, ScoredEntry, StudentStanding,
};
use crate::error::CoreResult;
use crate::model::{
    AttendanceRecord, AttendanceStatus, Class, Exam, LetterGrade, Student, TeacherNote,
};
use crate::store;

pub const RECENT_GRADES: usize = 6;

/// Scores and attendance for a fixed set of students.
struct ScopeData {
    scores: HashMap<String, Vec<ScoredEntry>>,
    attendance: HashMap<String, Vec<AttendanceStatus>>,
}

impl ScopeData {
    fn fetch(conn: &Connection, student_ids: &[String]) -> CoreResult<Self> {
        Ok(Self {
            scores: store::published_scores_for_students(conn, student_ids)?,
            attendance: store::attendance_statuses_for_students(conn, student_ids)?,
        })
    }

    /// Average optionally scoped to one class; attendance always covers all
    /// of the student's classes.
    fn standing(&self, student_id: &str, class_scope: Option<&str>) -> StudentStanding {
        let entries = self.scores.get(student_id).map(Vec::as_slice).unwrap_or(&[]);
        let statuses = self.attendance.get(student_id).map(Vec::as_slice).unwrap_or(&[]);
        StudentStanding {
            student_id: student_id.to_string(),
            average: calc::average_percent(entries, class_scope),
            attendance_rate: calc::attendance_rate(statuses.iter().copied()),
        }
    }

    fn standings(&self, student_ids: &[String], class_scope: Option<&str>) -> Vec<StudentStanding> {
        student_ids
            .iter()
            .map(|id| self.standing(id, class_scope))
            .collect()
    }
}

pub fn standings_for(
    conn: &Connection,
    student_ids: &[String],
    class_scope: Option<&str>,
) -> CoreResult<Vec<StudentStanding>> {
    Ok(ScopeData::fetch(conn, student_ids)?.standings(student_ids, class_scope))
}

/// Letter histogram of a class's students, averages scoped to the class.
pub fn class_distribution(conn: &Connection, class_id: &str) -> CoreResult<GradeDistribution> {
    store::require_class(conn, class_id)?;
    let roster = store::roster_ids(conn, class_id)?;
    let standings = standings_for(conn, &roster, Some(class_id))?;
    Ok(calc::grade_distribution(&standings))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student_id: String,
    pub name: String,
    pub average: Option<i64>,
    pub attendance_rate: i64,
    pub low_grade: bool,
    pub low_attendance: bool,
}

fn at_risk_list(summary: &CohortSummary, names: &HashMap<String, String>) -> Vec<AtRiskStudent> {
    summary
        .at_risk
        .iter()
        .map(|s| AtRiskStudent {
            student_id: s.student_id.clone(),
            name: names.get(&s.student_id).cloned().unwrap_or_default(),
            average: s.average,
            attendance_rate: s.attendance_rate,
            low_grade: s.low_grade(),
            low_attendance: s.low_attendance(),
        })
        .collect()
}

fn display_names(conn: &Connection, class_id: Option<&str>) -> CoreResult<HashMap<String, String>> {
    Ok(store::list_students(conn, class_id)?
        .into_iter()
        .map(|s| {
            let name = s.display_name();
            (s.id, name)
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSnapshot {
    pub class: Class,
    #[serde(flatten)]
    pub summary: CohortSummary,
    pub at_risk: Vec<AtRiskStudent>,
}

pub fn class_snapshot(conn: &Connection, class_id: &str) -> CoreResult<ClassSnapshot> {
    let class = store::get_class(conn, class_id)?;
    let standings = standings_for(conn, &class.student_ids, Some(class_id))?;
    let summary = calc::summarize_cohort(&standings);
    let names = display_names(conn, Some(class_id))?;
    let at_risk = at_risk_list(&summary, &names);
    Ok(ClassSnapshot {
        class,
        summary,
        at_risk,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassComparisonRow {
    pub class_id: String,
    pub name: String,
    pub subject: String,
    #[serde(flatten)]
    pub summary: CohortSummary,
}

/// One row per class, each averaged over that class's work only.
pub fn class_comparison(conn: &Connection) -> CoreResult<Vec<ClassComparisonRow>> {
    let classes = store::list_classes(conn)?;
    let everyone = enrolled_union(&classes);
    let data = ScopeData::fetch(conn, &everyone)?;
    Ok(classes
        .into_iter()
        .map(|c| {
            let standings = data.standings(&c.student_ids, Some(&c.id));
            ClassComparisonRow {
                summary: calc::summarize_cohort(&standings),
                class_id: c.id,
                name: c.name,
                subject: c.subject,
            }
        })
        .collect())
}

fn enrolled_union(classes: &[Class]) -> Vec<String> {
    let ids: BTreeSet<&String> = classes.iter().flat_map(|c| c.student_ids.iter()).collect();
    ids.into_iter().cloned().collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolOverview {
    pub class_count: usize,
    #[serde(flatten)]
    pub summary: CohortSummary,
    pub at_risk: Vec<AtRiskStudent>,
}

/// Every enrolled student counted once, averages across all classes.
pub fn school_overview(conn: &Connection) -> CoreResult<SchoolOverview> {
    let classes = store::list_classes(conn)?;
    let everyone = enrolled_union(&classes);
    let standings = standings_for(conn, &everyone, None)?;
    let summary = calc::summarize_cohort(&standings);
    let names = display_names(conn, None)?;
    let at_risk = at_risk_list(&summary, &names);
    Ok(SchoolOverview {
        class_count: classes.len(),
        summary,
        at_risk,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamStatsRow {
    pub exam: Exam,
    #[serde(flatten)]
    pub stats: ExamScoreStats,
}

pub fn exam_stats_for_class(conn: &Connection, class_id: &str) -> CoreResult<Vec<ExamStatsRow>> {
    Ok(store::published_exam_scores(conn, class_id)?
        .into_iter()
        .map(|(exam, scores)| {
            let stats = calc::exam_score_stats(&scores, exam.max_score);
            ExamStatsRow { exam, stats }
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAverage {
    pub class_id: String,
    pub class_name: String,
    pub average: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentGrade {
    pub exam_id: String,
    pub exam_name: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub score: f64,
    pub max_score: f64,
    pub percentage: i64,
    pub letter_grade: LetterGrade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student: Student,
    pub average: Option<i64>,
    pub attendance_rate: i64,
    pub class_averages: Vec<ClassAverage>,
    pub recent_grades: Vec<RecentGrade>,
    pub attendance: Vec<AttendanceRecord>,
    pub notes: Vec<TeacherNote>,
}

pub fn student_profile(conn: &Connection, student_id: &str) -> CoreResult<StudentProfile> {
    let student = store::get_student(conn, student_id)?;
    let ids = vec![student.id.clone()];
    let data = ScopeData::fetch(conn, &ids)?;
    let overall = data.standing(&student.id, None);

    let class_names: HashMap<String, String> = store::list_classes(conn)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let class_averages = student
        .class_ids
        .iter()
        .map(|cid| ClassAverage {
            class_id: cid.clone(),
            class_name: class_names.get(cid).cloned().unwrap_or_default(),
            average: data.standing(&student.id, Some(cid)).average,
        })
        .collect();

    let recent_grades = store::recent_published_scores(conn, &student.id, RECENT_GRADES)?
        .into_iter()
        .map(|p| {
            let percentage = calc::percentage(p.score, p.exam.max_score);
            RecentGrade {
                exam_id: p.exam.id,
                exam_name: p.exam.name,
                class_id: p.exam.class_id,
                date: p.exam.date,
                score: p.score,
                max_score: p.exam.max_score,
                percentage,
                letter_grade: calc::letter_grade(percentage),
            }
        })
        .collect();

    let attendance = store::attendance_for_student(conn, &student.id)?;
    let notes = store::list_notes(conn, &student.id)?;

    Ok(StudentProfile {
        average: overall.average,
        attendance_rate: overall.attendance_rate,
        class_averages,
        recent_grades,
        attendance,
        notes,
        student,
    })
}
