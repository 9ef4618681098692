use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::{AttendanceRecord, AttendanceStatus, LetterGrade};

pub const AT_RISK_AVERAGE: i64 = 65;
pub const AT_RISK_ATTENDANCE: i64 = 80;
pub const TOP_PERFORMER_AVERAGE: i64 = 90;
pub const PASS_PERCENT: f64 = 60.0;

/// Half-up rounding to a whole number (`floor(x + 0.5)`), matching how the
/// dashboard has always displayed percentages.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Whole-number percentage of `score` out of `max_score`.
pub fn percentage(score: f64, max_score: f64) -> i64 {
    if max_score > 0.0 {
        round_half_up(score / max_score * 100.0)
    } else {
        0
    }
}

/// Fixed letter thresholds, inclusive lower bounds.
pub fn letter_grade(percent: i64) -> LetterGrade {
    if percent >= 90 {
        LetterGrade::A
    } else if percent >= 80 {
        LetterGrade::B
    } else if percent >= 70 {
        LetterGrade::C
    } else if percent >= 60 {
        LetterGrade::D
    } else {
        LetterGrade::F
    }
}

/// Letter for a single entry, or `None` while the score is still blank.
pub fn entry_letter(score: Option<f64>, max_score: f64) -> Option<LetterGrade> {
    score.map(|s| letter_grade(percentage(s, max_score)))
}

/// A published, non-null score joined with its exam's maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub class_id: String,
    pub score: f64,
    pub max_score: f64,
}

/// Mean of per-entry percentages, rounded. `None` when there is nothing to
/// average; that is not the same thing as 0%.
pub fn average_percent<'a, I>(entries: I, class_id: Option<&str>) -> Option<i64>
where
    I: IntoIterator<Item = &'a ScoredEntry>,
{
    let mut sum: i64 = 0;
    let mut count: i64 = 0;
    for e in entries {
        if let Some(cid) = class_id {
            if e.class_id != cid {
                continue;
            }
        }
        sum += percentage(e.score, e.max_score);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(round_half_up(sum as f64 / count as f64))
}

/// Share of records marked present or late. A student with no history gets 100.
pub fn attendance_rate<I>(statuses: I) -> i64
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut total: usize = 0;
    let mut attended: usize = 0;
    for s in statuses {
        total += 1;
        if s.counts_as_attended() {
            attended += 1;
        }
    }
    if total == 0 {
        return 100;
    }
    round_half_up(attended as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

impl StatusCounts {
    fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.present + self.absent + self.late + self.excused
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyAttendance {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

/// Per-date status counts, ascending by date. Dates without records are not
/// filled in.
pub fn daily_breakdown(records: &[AttendanceRecord]) -> Vec<DailyAttendance> {
    let mut by_date: BTreeMap<NaiveDate, StatusCounts> = BTreeMap::new();
    for r in records {
        by_date.entry(r.date).or_default().add(r.status);
    }
    by_date
        .into_iter()
        .map(|(date, counts)| DailyAttendance { date, counts })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub date: Option<NaiveDate>,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total: usize,
    pub total_students: usize,
    pub present_rate: i64,
}

/// Dashboard card: today's counts if anything was taken today, otherwise the
/// most recent day that has records.
pub fn day_summary(
    records: &[AttendanceRecord],
    today: NaiveDate,
    total_students: usize,
) -> DaySummary {
    let date = if records.iter().any(|r| r.date == today) {
        Some(today)
    } else {
        records.iter().map(|r| r.date).max()
    };
    let mut counts = StatusCounts::default();
    if let Some(d) = date {
        for r in records.iter().filter(|r| r.date == d) {
            counts.add(r.status);
        }
    }
    let total = counts.total();
    let present_rate = if total > 0 {
        round_half_up(counts.present as f64 / total as f64 * 100.0)
    } else {
        0
    };
    DaySummary {
        date,
        counts,
        total,
        total_students,
        present_rate,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
    #[serde(rename = "C")]
    pub c: usize,
    #[serde(rename = "D")]
    pub d: usize,
    #[serde(rename = "F")]
    pub f: usize,
}

impl GradeDistribution {
    pub fn add(&mut self, letter: LetterGrade) {
        match letter {
            LetterGrade::A => self.a += 1,
            LetterGrade::B => self.b += 1,
            LetterGrade::C => self.c += 1,
            LetterGrade::D => self.d += 1,
            LetterGrade::F => self.f += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.d + self.f
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub student_id: String,
    pub average: Option<i64>,
    pub attendance_rate: i64,
}

impl StudentStanding {
    pub fn low_grade(&self) -> bool {
        matches!(self.average, Some(avg) if avg < AT_RISK_AVERAGE)
    }

    pub fn low_attendance(&self) -> bool {
        self.attendance_rate < AT_RISK_ATTENDANCE
    }

    /// Students without grades are judged on attendance alone.
    pub fn is_at_risk(&self) -> bool {
        self.low_grade() || self.low_attendance()
    }

    pub fn is_top_performer(&self) -> bool {
        matches!(self.average, Some(avg) if avg >= TOP_PERFORMER_AVERAGE)
    }
}

/// Letter histogram over students that have an average; the rest are left out.
pub fn grade_distribution(standings: &[StudentStanding]) -> GradeDistribution {
    let mut dist = GradeDistribution::default();
    for s in standings {
        if let Some(avg) = s.average {
            dist.add(letter_grade(avg));
        }
    }
    dist
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub student_count: usize,
    pub average: i64,
    pub attendance_rate: i64,
    pub at_risk_count: usize,
    pub top_performers: usize,
    pub distribution: GradeDistribution,
    #[serde(skip)]
    pub at_risk: Vec<StudentStanding>,
}

/// Cohort means are 0 for an empty cohort (or one where nobody has grades),
/// unlike the per-student average.
pub fn summarize_cohort(standings: &[StudentStanding]) -> CohortSummary {
    let graded: Vec<i64> = standings.iter().filter_map(|s| s.average).collect();
    let average = if graded.is_empty() {
        0
    } else {
        round_half_up(graded.iter().sum::<i64>() as f64 / graded.len() as f64)
    };
    let attendance_rate = if standings.is_empty() {
        0
    } else {
        round_half_up(
            standings.iter().map(|s| s.attendance_rate).sum::<i64>() as f64
                / standings.len() as f64,
        )
    };
    let at_risk: Vec<StudentStanding> = standings
        .iter()
        .filter(|s| s.is_at_risk())
        .cloned()
        .collect();

    CohortSummary {
        student_count: standings.len(),
        average,
        attendance_rate,
        at_risk_count: at_risk.len(),
        top_performers: standings.iter().filter(|s| s.is_top_performer()).count(),
        distribution: grade_distribution(standings),
        at_risk,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamScoreStats {
    pub average: i64,
    pub high: f64,
    pub low: f64,
    pub pass_rate: i64,
    pub entry_count: usize,
}

/// Raw-score statistics for one exam's entered scores.
pub fn exam_score_stats(scores: &[f64], max_score: f64) -> ExamScoreStats {
    if scores.is_empty() {
        return ExamScoreStats {
            average: 0,
            high: 0.0,
            low: 0.0,
            pass_rate: 0,
            entry_count: 0,
        };
    }
    let n = scores.len() as f64;
    let high = scores.iter().copied().fold(f64::MIN, f64::max);
    let low = scores.iter().copied().fold(f64::MAX, f64::min);
    let passed = scores
        .iter()
        .filter(|s| max_score > 0.0 && **s / max_score * 100.0 >= PASS_PERCENT)
        .count();
    ExamScoreStats {
        average: round_half_up(scores.iter().sum::<f64>() / n),
        high,
        low,
        pass_rate: round_half_up(passed as f64 / n * 100.0),
        entry_count: scores.len(),
    }
}
