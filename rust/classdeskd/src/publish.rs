//! Score entry for a single exam: a draft held in the session, saved as a
//! whole, and published to guardians in one direction only.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::model::{Exam, GradeEntry};

/// Writes the workflow needs from persistence.
pub trait GradebookStore {
    /// Replace every entry of the exam with the given scores (blanking the
    /// rest). Returns the number of rows written.
    fn sync_exam_scores(
        &self,
        exam: &Exam,
        scores: &BTreeMap<String, Option<f64>>,
    ) -> CoreResult<usize>;

    /// Flip the exam to published and make the stored scores guardian-visible.
    fn mark_exam_published(&self, exam_id: &str) -> CoreResult<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftState {
    /// Freshly loaded from storage; the user has not acted yet.
    Loaded,
    Unsaved,
    SavedDraft,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftAction {
    SetScore,
    SaveDraft,
    Publish,
}

/// State after an action has taken effect. Editing always makes the draft
/// dirty again, including after a publish.
pub fn transition(state: DraftState, action: DraftAction) -> DraftState {
    match (state, action) {
        (_, DraftAction::SetScore) => DraftState::Unsaved,
        (_, DraftAction::SaveDraft) => DraftState::SavedDraft,
        (_, DraftAction::Publish) => DraftState::Published,
    }
}

#[derive(Debug, Clone)]
pub struct GradeDraft {
    exam: Exam,
    roster: BTreeSet<String>,
    scores: BTreeMap<String, Option<f64>>,
    state: DraftState,
    /// Stored edits to a published exam that guardians cannot see yet.
    pending_publish: bool,
}

impl GradeDraft {
    /// Draft for `exam` with one slot per rostered student, filled from the
    /// persisted entries (blank when a student has none).
    pub fn load(exam: Exam, roster: &[String], entries: &[GradeEntry]) -> Self {
        let persisted: BTreeMap<&str, Option<f64>> = entries
            .iter()
            .filter(|e| e.exam_id == exam.id)
            .map(|e| (e.student_id.as_str(), e.score))
            .collect();
        let scores = roster
            .iter()
            .map(|sid| (sid.clone(), persisted.get(sid.as_str()).copied().flatten()))
            .collect();
        let pending_publish = exam.is_published
            && entries
                .iter()
                .any(|e| e.exam_id == exam.id && !e.is_published);
        Self {
            exam,
            roster: roster.iter().cloned().collect(),
            scores,
            state: DraftState::Loaded,
            pending_publish,
        }
    }

    pub fn exam(&self) -> &Exam {
        &self.exam
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn scores(&self) -> &BTreeMap<String, Option<f64>> {
        &self.scores
    }

    pub fn entered_count(&self) -> usize {
        self.scores.values().filter(|s| s.is_some()).count()
    }

    fn validate(&self, student_id: &str, score: Option<f64>) -> CoreResult<()> {
        if !self.roster.contains(student_id) {
            return Err(CoreError::not_found("student", student_id));
        }
        if let Some(s) = score {
            if !s.is_finite() || s < 0.0 || s > self.exam.max_score {
                return Err(CoreError::InvalidScore {
                    student_id: student_id.to_string(),
                    score: s,
                    max_score: self.exam.max_score,
                });
            }
        }
        Ok(())
    }

    /// Out-of-range scores are rejected, never clamped; the draft is left
    /// untouched on error.
    pub fn set_score(&mut self, student_id: &str, score: Option<f64>) -> CoreResult<()> {
        self.validate(student_id, score)?;
        self.scores.insert(student_id.to_string(), score);
        self.state = transition(self.state, DraftAction::SetScore);
        debug!(exam_id = %self.exam.id, student_id, ?score, "draft score set");
        Ok(())
    }

    pub fn save_draft<S: GradebookStore + ?Sized>(&mut self, store: &S) -> CoreResult<()> {
        let written = store
            .sync_exam_scores(&self.exam, &self.scores)
            .inspect_err(|e| {
                warn!(exam_id = %self.exam.id, error = %e, "saving grade draft failed")
            })?;
        let edited = self.state == DraftState::Unsaved;
        self.state = transition(self.state, DraftAction::SaveDraft);
        self.pending_publish = self.exam.is_published && (self.pending_publish || edited);
        info!(exam_id = %self.exam.id, written, "grade draft saved");
        Ok(())
    }

    /// Persist the draft, then publish the exam. The two writes are separate:
    /// if the second fails the scores are stored but still hidden, exactly as
    /// after `save_draft`, and the in-memory draft is unchanged.
    pub fn publish<S: GradebookStore + ?Sized>(&mut self, store: &S) -> CoreResult<()> {
        store
            .sync_exam_scores(&self.exam, &self.scores)
            .inspect_err(|e| {
                warn!(
                    exam_id = %self.exam.id,
                    error = %e,
                    "persisting scores before publish failed"
                )
            })?;
        let published = store
            .mark_exam_published(&self.exam.id)
            .inspect_err(|e| {
                warn!(exam_id = %self.exam.id, error = %e, "publishing exam failed")
            })?;
        self.exam.is_published = true;
        self.pending_publish = false;
        self.state = transition(self.state, DraftAction::Publish);
        info!(
            exam_id = %self.exam.id,
            entries = published,
            entered = self.entered_count(),
            roster = self.roster.len(),
            "exam published"
        );
        Ok(())
    }

    pub fn view(&self) -> DraftView {
        let state = self.state();
        let unsaved = state == DraftState::Unsaved;
        DraftView {
            exam: self.exam.clone(),
            state,
            scores: self.scores().clone(),
            entered_count: self.entered_count(),
            roster_size: self.roster.len(),
            show_draft_saved: matches!(state, DraftState::Unsaved | DraftState::SavedDraft),
            needs_publish: self.exam.is_published && (unsaved || self.pending_publish),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub exam: Exam,
    pub state: DraftState,
    pub scores: BTreeMap<String, Option<f64>>,
    pub entered_count: usize,
    pub roster_size: usize,
    pub show_draft_saved: bool,
    pub needs_publish: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::ExamType;
    use crate::store;
    use crate::store::tests::{seed_class, seed_exam, seed_student};
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeStore {
        fail_sync: Cell<bool>,
        fail_publish: Cell<bool>,
        persisted: RefCell<BTreeMap<String, Option<f64>>>,
        published: Cell<bool>,
    }

    impl GradebookStore for FakeStore {
        fn sync_exam_scores(
            &self,
            _exam: &Exam,
            scores: &BTreeMap<String, Option<f64>>,
        ) -> CoreResult<usize> {
            if self.fail_sync.get() {
                return Err(CoreError::Store(rusqlite::Error::InvalidQuery));
            }
            *self.persisted.borrow_mut() = scores.clone();
            Ok(scores.len())
        }

        fn mark_exam_published(&self, _exam_id: &str) -> CoreResult<usize> {
            if self.fail_publish.get() {
                return Err(CoreError::Store(rusqlite::Error::InvalidQuery));
            }
            self.published.set(true);
            Ok(self.persisted.borrow().len())
        }
    }

    fn exam(max_score: f64) -> Exam {
        Exam {
            id: "e1".into(),
            class_id: "c1".into(),
            name: "Unit Test".into(),
            date: NaiveDate::from_ymd_opt(2024, 9, 6).expect("date"),
            max_score,
            exam_type: ExamType::Test,
            is_published: false,
        }
    }

    fn roster() -> Vec<String> {
        vec!["s1".to_string(), "s2".to_string()]
    }

    #[test]
    fn transitions_from_every_state() {
        use DraftState::*;
        for s in [Loaded, Unsaved, SavedDraft, Published] {
            assert_eq!(transition(s, DraftAction::SetScore), Unsaved);
            assert_eq!(transition(s, DraftAction::SaveDraft), SavedDraft);
            assert_eq!(transition(s, DraftAction::Publish), Published);
        }
    }

    #[test]
    fn load_fills_blanks_for_students_without_entries() {
        let entries = vec![GradeEntry {
            id: "g1".into(),
            student_id: "s1".into(),
            exam_id: "e1".into(),
            class_id: "c1".into(),
            score: Some(7.0),
            letter_grade: None,
            published_score: None,
            is_published: false,
        }];
        let draft = GradeDraft::load(exam(10.0), &roster(), &entries);
        assert_eq!(draft.state(), DraftState::Loaded);
        assert_eq!(draft.scores()["s1"], Some(7.0));
        assert_eq!(draft.scores()["s2"], None);
        assert!(!draft.view().show_draft_saved);
    }

    #[test]
    fn score_above_max_is_rejected_without_touching_the_draft() {
        let mut draft = GradeDraft::load(exam(100.0), &roster(), &[]);
        let err = draft.set_score("s1", Some(120.0)).unwrap_err();
        assert_eq!(err.code(), "bad_params");
        assert_eq!(draft.state(), DraftState::Loaded);
        assert_eq!(draft.scores()["s1"], None);

        assert!(draft.set_score("s1", Some(-1.0)).is_err());
        assert!(draft.set_score("s1", Some(f64::NAN)).is_err());
        assert_eq!(draft.set_score("ghost", Some(1.0)).unwrap_err().code(), "not_found");
        assert_eq!(draft.state(), DraftState::Loaded);

        draft.set_score("s1", Some(100.0)).expect("max is allowed");
        draft.set_score("s2", Some(0.0)).expect("zero is allowed");
        draft.set_score("s2", None).expect("clearing is allowed");
        assert_eq!(draft.state(), DraftState::Unsaved);
    }

    #[test]
    fn editing_after_publish_marks_dirty_but_keeps_exam_published() {
        let store = FakeStore::default();
        let mut draft = GradeDraft::load(exam(10.0), &roster(), &[]);
        draft.set_score("s1", Some(9.0)).expect("set");
        draft.publish(&store).expect("publish");
        assert_eq!(draft.state(), DraftState::Published);
        assert!(draft.exam().is_published);

        draft.set_score("s1", Some(8.0)).expect("set");
        assert_eq!(draft.state(), DraftState::Unsaved);
        assert!(draft.exam().is_published);
        assert!(draft.view().needs_publish);
        assert_eq!(store.persisted.borrow()["s1"], Some(9.0));
    }

    #[test]
    fn failed_save_leaves_draft_as_it_was() {
        let store = FakeStore::default();
        store.fail_sync.set(true);
        let mut draft = GradeDraft::load(exam(10.0), &roster(), &[]);
        draft.set_score("s1", Some(9.0)).expect("set");
        assert_eq!(draft.save_draft(&store).unwrap_err().code(), "db_query_failed");
        assert_eq!(draft.state(), DraftState::Unsaved);
        assert_eq!(draft.scores()["s1"], Some(9.0));

        store.fail_sync.set(false);
        draft.save_draft(&store).expect("retry");
        assert_eq!(draft.state(), DraftState::SavedDraft);
    }

    #[test]
    fn publish_failing_after_persist_looks_like_a_saved_draft() {
        let store = FakeStore::default();
        store.fail_publish.set(true);
        let mut draft = GradeDraft::load(exam(10.0), &roster(), &[]);
        draft.set_score("s2", Some(4.0)).expect("set");
        assert!(draft.publish(&store).is_err());
        assert_eq!(draft.state(), DraftState::Unsaved);
        assert!(!draft.exam().is_published);
        assert_eq!(store.persisted.borrow()["s2"], Some(4.0));
        assert!(!store.published.get());
    }

    #[test]
    fn save_draft_twice_persists_the_same_state() {
        let conn = open_in_memory();
        let class_id = seed_class(&conn, "Algebra");
        let a = seed_student(&conn, "Ada", "Lovelace", &[&class_id]);
        let b = seed_student(&conn, "Alan", "Turing", &[&class_id]);
        let exam_id = seed_exam(&conn, &class_id, 3, 50.0);
        let exam = store::get_exam(&conn, &exam_id).expect("exam");
        let roster = store::roster_ids(&conn, &class_id).expect("roster");

        let mut draft = GradeDraft::load(exam, &roster, &[]);
        draft.set_score(&a, Some(45.0)).expect("set");
        draft.set_score(&b, Some(30.0)).expect("set");
        draft.save_draft(&conn).expect("save");
        let snapshot = |conn: &rusqlite::Connection| {
            let mut rows: Vec<(String, String, Option<f64>, Option<String>, bool)> =
                store::entries_for_exam(conn, &exam_id)
                    .expect("entries")
                    .into_iter()
                    .map(|e| {
                        (
                            e.id,
                            e.student_id,
                            e.score,
                            e.letter_grade.map(|l| l.to_string()),
                            e.is_published,
                        )
                    })
                    .collect();
            rows.sort_by(|x, y| x.0.cmp(&y.0));
            rows
        };
        let first = snapshot(&conn);
        draft.save_draft(&conn).expect("save again");
        assert_eq!(first, snapshot(&conn));
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn publish_makes_exam_and_entries_visible() {
        let conn = open_in_memory();
        let class_id = seed_class(&conn, "Algebra");
        let a = seed_student(&conn, "Ada", "Lovelace", &[&class_id]);
        let b = seed_student(&conn, "Alan", "Turing", &[&class_id]);
        let exam_id = seed_exam(&conn, &class_id, 3, 50.0);
        let exam = store::get_exam(&conn, &exam_id).expect("exam");
        let roster = store::roster_ids(&conn, &class_id).expect("roster");

        let mut draft = GradeDraft::load(exam, &roster, &[]);
        draft.set_score(&a, Some(45.0)).expect("set");
        draft.save_draft(&conn).expect("save");
        assert_eq!(store::student_average(&conn, &a, None).expect("avg"), None);

        draft.publish(&conn).expect("publish");
        assert!(store::get_exam(&conn, &exam_id).expect("exam").is_published);
        let entries = store::entries_for_exam(&conn, &exam_id).expect("entries");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_published));
        assert_eq!(store::student_average(&conn, &a, None).expect("avg"), Some(90));
        assert_eq!(store::student_average(&conn, &b, None).expect("avg"), None);
    }

    #[test]
    fn saved_edits_to_a_published_exam_stay_hidden_until_republished() {
        let conn = open_in_memory();
        let class_id = seed_class(&conn, "Algebra");
        let a = seed_student(&conn, "Ada", "Lovelace", &[&class_id]);
        let exam_id = seed_exam(&conn, &class_id, 3, 50.0);
        let exam = store::get_exam(&conn, &exam_id).expect("exam");
        let roster = store::roster_ids(&conn, &class_id).expect("roster");

        let mut draft = GradeDraft::load(exam, &roster, &[]);
        draft.set_score(&a, Some(45.0)).expect("set");
        draft.publish(&conn).expect("publish");
        assert_eq!(store::student_average(&conn, &a, None).expect("avg"), Some(90));

        draft.set_score(&a, Some(10.0)).expect("set");
        draft.save_draft(&conn).expect("save");
        assert_eq!(draft.state(), DraftState::SavedDraft);
        assert!(draft.view().needs_publish);
        assert_eq!(store::student_average(&conn, &a, None).expect("avg"), Some(90));
        let entries = store::entries_for_exam(&conn, &exam_id).expect("entries");
        assert_eq!(entries[0].score, Some(10.0));
        assert_eq!(entries[0].published_score, Some(45.0));
        assert!(!entries[0].is_published);

        let exam = store::get_exam(&conn, &exam_id).expect("exam");
        let reopened = GradeDraft::load(exam, &roster, &entries);
        assert_eq!(reopened.state(), DraftState::Loaded);
        assert!(reopened.view().needs_publish);

        draft.publish(&conn).expect("republish");
        assert!(!draft.view().needs_publish);
        assert_eq!(store::student_average(&conn, &a, None).expect("avg"), Some(20));
    }

    #[test]
    fn resaving_a_published_exam_without_edits_needs_no_publish() {
        let store = FakeStore::default();
        let mut draft = GradeDraft::load(exam(10.0), &roster(), &[]);
        draft.set_score("s1", Some(9.0)).expect("set");
        draft.publish(&store).expect("publish");
        draft.save_draft(&store).expect("save");
        assert_eq!(draft.state(), DraftState::SavedDraft);
        assert!(!draft.view().needs_publish);
    }
}
