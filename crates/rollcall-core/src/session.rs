//! Attendance session state machine.
//!
//! `IDLE → CLASS_SELECTED → CAPTURING → ANALYZING → REVIEWING → IDLE`.
//! Commit and cancel both return to `IDLE`; retake goes from `REVIEWING`
//! back to `CAPTURING`. Every transition is a method that either moves the
//! state or returns a [`SessionError`] and leaves it untouched.
//!
//! Captures and recognition calls are tagged with an attempt number. A
//! capture or completion whose attempt no longer matches the current state
//! is discarded. At most one recognition call is outstanding.

use crate::reconcile::{Draft, DraftSummary, NewStudent, ValidationError};
use crate::roster::{RosterError, RosterStore};
use crate::types::{Analysis, AttendanceStatus, CapturedImage, Student};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    ClassSelected,
    Capturing,
    Analyzing,
    Reviewing,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "IDLE",
            Phase::ClassSelected => "CLASS_SELECTED",
            Phase::Capturing => "CAPTURING",
            Phase::Analyzing => "ANALYZING",
            Phase::Reviewing => "REVIEWING",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("operator name and secret are required")]
    MissingCredentials,
    #[error("no operator logged in")]
    NotAuthenticated,
    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },
    #[error("a recognition call is still in flight")]
    Busy,
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Handle for one capture request, returned when capture starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTicket {
    pub attempt: u64,
    pub class_id: String,
}

/// Handle for one recognition call, returned when analysis starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTicket {
    pub attempt: u64,
}

/// What happened to a recognition completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Derivation ran and the session is now reviewing.
    Applied,
    /// The session moved on; the result was dropped.
    Discarded,
}

/// Summary of a committed attendance record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub class_id: String,
    pub committed_at: DateTime<Utc>,
    pub total: usize,
    pub present: usize,
    pub absent: usize,
}

#[derive(Debug, Clone)]
enum SessionState {
    Idle,
    ClassSelected {
        class_id: String,
    },
    Capturing {
        class_id: String,
        attempt: u64,
    },
    Analyzing {
        class_id: String,
        image: CapturedImage,
        snapshot: Vec<Student>,
        attempt: u64,
    },
    Reviewing {
        class_id: String,
        image: CapturedImage,
        analysis: Analysis,
        draft: Draft,
    },
}

impl SessionState {
    fn phase(&self) -> Phase {
        match self {
            SessionState::Idle => Phase::Idle,
            SessionState::ClassSelected { .. } => Phase::ClassSelected,
            SessionState::Capturing { .. } => Phase::Capturing,
            SessionState::Analyzing { .. } => Phase::Analyzing,
            SessionState::Reviewing { .. } => Phase::Reviewing,
        }
    }

    fn class_id(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::ClassSelected { class_id }
            | SessionState::Capturing { class_id, .. }
            | SessionState::Analyzing { class_id, .. }
            | SessionState::Reviewing { class_id, .. } => Some(class_id),
        }
    }
}

/// Serializable view of the session for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: Phase,
    pub operator: Option<String>,
    pub class_id: Option<String>,
    /// True while a recognition call is outstanding.
    pub busy: bool,
    pub analysis: Option<Analysis>,
    pub total: Option<usize>,
    pub present: Option<usize>,
}

/// The single operator session.
#[derive(Debug)]
pub struct Session {
    operator: Option<String>,
    state: SessionState,
    in_flight: Option<u64>,
    next_attempt: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            operator: None,
            state: SessionState::Idle,
            in_flight: None,
            next_attempt: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn class_id(&self) -> Option<&str> {
        self.state.class_id()
    }

    /// True while a recognition call is outstanding, even after the session moved on.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Presence-only credential check.
    pub fn login(&mut self, operator: &str, secret: &str) -> Result<(), SessionError> {
        let operator = operator.trim();
        if operator.is_empty() || secret.trim().is_empty() {
            return Err(SessionError::MissingCredentials);
        }
        tracing::info!(operator, "operator logged in");
        self.operator = Some(operator.to_string());
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Reset to `IDLE` from any state, discarding any draft.
    ///
    /// An outstanding recognition call keeps the session busy until it
    /// completes; its result is then discarded.
    pub fn logout(&mut self) {
        tracing::info!(phase = %self.phase(), "operator logged out");
        self.operator = None;
        self.state = SessionState::Idle;
    }

    pub fn select_class(&mut self, class_id: &str) -> Result<(), SessionError> {
        self.require_operator()?;
        match self.state {
            SessionState::Idle | SessionState::ClassSelected { .. } => {
                tracing::info!(class_id, "class selected");
                self.state = SessionState::ClassSelected {
                    class_id: class_id.to_string(),
                };
                Ok(())
            }
            _ => Err(self.invalid("select a class")),
        }
    }

    /// Request a still from the camera. Refused while a call is in flight.
    pub fn begin_capture(&mut self) -> Result<CaptureTicket, SessionError> {
        self.require_operator()?;
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        match &self.state {
            SessionState::ClassSelected { class_id } => {
                let class_id = class_id.clone();
                let ticket = CaptureTicket {
                    attempt: self.take_attempt(),
                    class_id,
                };
                self.state = SessionState::Capturing {
                    class_id: ticket.class_id.clone(),
                    attempt: ticket.attempt,
                };
                Ok(ticket)
            }
            _ => Err(self.invalid("capture")),
        }
    }

    fn is_current_capture(&self, ticket: &CaptureTicket) -> bool {
        matches!(&self.state, SessionState::Capturing { attempt, .. } if *attempt == ticket.attempt)
    }

    /// Camera failure aborts the session to `IDLE`; no draft is created.
    pub fn capture_failed(&mut self, ticket: &CaptureTicket) -> Completion {
        if !self.is_current_capture(ticket) {
            tracing::info!(
                attempt = ticket.attempt,
                phase = %self.phase(),
                "stale capture failure ignored"
            );
            return Completion::Discarded;
        }
        tracing::warn!(class_id = %ticket.class_id, "capture failed; session aborted");
        self.state = SessionState::Idle;
        Completion::Applied
    }

    /// Hand over the captured still and the roster snapshot it will be
    /// reconciled against. Moves to `ANALYZING`.
    ///
    /// Returns `None` when the capture belongs to a request the session has
    /// moved past; the still is dropped.
    pub fn capture_succeeded(
        &mut self,
        ticket: &CaptureTicket,
        image: CapturedImage,
        snapshot: Vec<Student>,
    ) -> Result<Option<AnalysisTicket>, SessionError> {
        if !self.is_current_capture(ticket) {
            tracing::info!(
                attempt = ticket.attempt,
                phase = %self.phase(),
                "stale capture discarded"
            );
            return Ok(None);
        }
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        let class_id = ticket.class_id.clone();
        let attempt = self.take_attempt();
        self.in_flight = Some(attempt);
        tracing::info!(
            class_id = %class_id,
            attempt,
            image_bytes = image.len(),
            roster = snapshot.len(),
            "analysis started"
        );
        self.state = SessionState::Analyzing {
            class_id,
            image,
            snapshot,
            attempt,
        };
        Ok(Some(AnalysisTicket { attempt }))
    }

    /// Deliver the recognition outcome for `ticket`.
    pub fn complete_analysis(&mut self, ticket: AnalysisTicket, analysis: Analysis) -> Completion {
        if self.in_flight == Some(ticket.attempt) {
            self.in_flight = None;
        }

        let current = match &self.state {
            SessionState::Analyzing { attempt, .. } => *attempt == ticket.attempt,
            _ => false,
        };
        if !current {
            tracing::info!(attempt = ticket.attempt, phase = %self.phase(), "stale analysis discarded");
            return Completion::Discarded;
        }

        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        if let SessionState::Analyzing {
            class_id,
            image,
            snapshot,
            ..
        } = state
        {
            let draft = Draft::derived(&snapshot, analysis.result());
            let summary = draft.summary();
            tracing::info!(
                class_id = %class_id,
                fallback = analysis.is_fallback(),
                present = summary.present,
                total = summary.total,
                "analysis applied"
            );
            self.state = SessionState::Reviewing {
                class_id,
                image,
                analysis,
                draft,
            };
        }
        Completion::Applied
    }

    /// Discard the draft and capture again.
    pub fn retake(&mut self) -> Result<CaptureTicket, SessionError> {
        self.require_operator()?;
        match &self.state {
            SessionState::Reviewing { class_id, .. } => {
                let class_id = class_id.clone();
                tracing::info!(class_id = %class_id, "retake requested; draft discarded");
                self.state = SessionState::ClassSelected { class_id };
                self.begin_capture()
            }
            SessionState::Analyzing { .. } => Err(SessionError::Busy),
            _ => Err(self.invalid("retake")),
        }
    }

    /// Abandon the session without committing.
    pub fn cancel(&mut self) {
        if !matches!(self.state, SessionState::Idle) {
            tracing::info!(phase = %self.phase(), "session cancelled");
        }
        self.state = SessionState::Idle;
    }

    pub fn draft(&self) -> Result<&Draft, SessionError> {
        match &self.state {
            SessionState::Reviewing { draft, .. } => Ok(draft),
            _ => Err(self.invalid("review")),
        }
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match &self.state {
            SessionState::Reviewing { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        match &self.state {
            SessionState::Analyzing { image, .. } | SessionState::Reviewing { image, .. } => {
                Some(image)
            }
            _ => None,
        }
    }

    pub fn toggle(&mut self, student_id: &str) -> Result<bool, SessionError> {
        Ok(self.draft_mut("toggle")?.toggle(student_id))
    }

    pub fn mark_all(&mut self, status: AttendanceStatus) -> Result<(), SessionError> {
        self.draft_mut("mark all")?.mark_all(status);
        Ok(())
    }

    pub fn unmark_all(&mut self) -> Result<(), SessionError> {
        self.draft_mut("unmark all")?.unmark_all();
        Ok(())
    }

    pub fn add_student(&mut self, new: NewStudent) -> Result<Student, SessionError> {
        Ok(self.draft_mut("add a student")?.add_student(new)?)
    }

    /// Write the draft to the store as a full replacement and return to `IDLE`.
    ///
    /// If the store rejects the write the session stays in `REVIEWING`.
    pub fn commit(&mut self, store: &RosterStore) -> Result<CommitReceipt, SessionError> {
        self.require_operator()?;
        let (class_id, students) = match &self.state {
            SessionState::Reviewing {
                class_id, draft, ..
            } => (class_id.clone(), draft.students().to_vec()),
            _ => return Err(self.invalid("commit")),
        };

        let present = students.iter().filter(|s| s.is_present()).count();
        let absent = students
            .iter()
            .filter(|s| s.status == AttendanceStatus::Absent)
            .count();
        let total = students.len();

        store.replace_students(&class_id, students)?;
        self.state = SessionState::Idle;

        tracing::info!(class_id = %class_id, present, absent, total, "attendance committed");
        Ok(CommitReceipt {
            class_id,
            committed_at: Utc::now(),
            total,
            present,
            absent,
        })
    }

    pub fn status(&self) -> SessionStatus {
        let summary: Option<DraftSummary> = self.draft().ok().map(Draft::summary);
        SessionStatus {
            phase: self.phase(),
            operator: self.operator.clone(),
            class_id: self.class_id().map(str::to_string),
            busy: self.is_busy(),
            analysis: self.analysis().cloned(),
            total: summary.map(|s| s.total),
            present: summary.map(|s| s.present),
        }
    }

    fn draft_mut(&mut self, action: &'static str) -> Result<&mut Draft, SessionError> {
        self.require_operator()?;
        let phase = self.phase();
        match &mut self.state {
            SessionState::Reviewing { draft, .. } => Ok(draft),
            _ => Err(SessionError::InvalidTransition { action, phase }),
        }
    }

    fn take_attempt(&mut self) -> u64 {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        attempt
    }

    fn require_operator(&self) -> Result<(), SessionError> {
        if self.operator.is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            phase: self.phase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisResult, ClassSection};
    use std::collections::BTreeSet;

    fn students(ids: &[&str]) -> Vec<Student> {
        ids.iter()
            .map(|id| Student::new(*id, format!("Student {id}"), format!("R{id}"), ""))
            .collect()
    }

    fn store() -> RosterStore {
        RosterStore::new(vec![ClassSection {
            id: "c1".into(),
            name: "Class 5-A".into(),
            grade: "5".into(),
            total_students: 3,
            students: students(&["A", "B"]),
        }])
        .unwrap()
    }

    fn completed(ids: &[&str]) -> Analysis {
        Analysis::Completed {
            result: AnalysisResult {
                student_count: ids.len() as u32,
                is_classroom: true,
                present_student_ids: ids.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
                ..AnalysisResult::fallback("classroom")
            },
        }
    }

    fn image() -> CapturedImage {
        CapturedImage::jpeg(vec![0xFF, 0xD8, 0xFF])
    }

    /// Logged in session sitting in `ANALYZING` for class c1.
    fn analyzing(store: &RosterStore) -> (Session, AnalysisTicket) {
        let mut session = Session::new();
        session.login("r.mehta", "pw").unwrap();
        session.select_class("c1").unwrap();
        let capture = session.begin_capture().unwrap();
        let snapshot = store.get_section("c1").unwrap().students;
        let ticket = session.capture_succeeded(&capture, image(), snapshot).unwrap().unwrap();
        (session, ticket)
    }

    #[test]
    fn test_login_requires_both_fields() {
        let mut session = Session::new();
        assert_eq!(session.login("  ", "pw"), Err(SessionError::MissingCredentials));
        assert_eq!(session.login("r.mehta", ""), Err(SessionError::MissingCredentials));
        assert!(session.login("r.mehta", "pw").is_ok());
        assert_eq!(session.operator(), Some("r.mehta"));
    }

    #[test]
    fn test_operations_require_login() {
        let mut session = Session::new();
        assert_eq!(session.select_class("c1"), Err(SessionError::NotAuthenticated));
    }

    #[test]
    fn test_full_cycle_commits_draft() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        assert_eq!(session.phase(), Phase::Analyzing);
        assert!(session.is_busy());

        assert_eq!(session.complete_analysis(ticket, completed(&["B"])), Completion::Applied);
        assert_eq!(session.phase(), Phase::Reviewing);
        assert!(!session.is_busy());

        session.toggle("A").unwrap();
        session.toggle("B").unwrap();
        session
            .add_student(NewStudent {
                name: "New".into(),
                roll_number: "R9".into(),
                photo_url: None,
            })
            .unwrap();
        let draft = session.draft().unwrap().students().to_vec();

        let receipt = session.commit(&store).unwrap();
        assert_eq!(receipt.total, 3);
        assert_eq!(receipt.present, 2);
        assert_eq!(receipt.absent, 1);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.class_id(), None);
        assert_eq!(store.get_section("c1").unwrap().students, draft);
    }

    #[test]
    fn test_fallback_completion_reviews_all_absent() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        let fallback = Analysis::Fallback {
            result: AnalysisResult::fallback("service unavailable"),
            reason: "connection refused".into(),
        };
        assert_eq!(session.complete_analysis(ticket, fallback), Completion::Applied);
        assert!(session.analysis().unwrap().is_fallback());
        assert!(session
            .draft()
            .unwrap()
            .students()
            .iter()
            .all(|s| s.status == AttendanceStatus::Absent));
    }

    #[test]
    fn test_no_capture_while_busy() {
        let store = store();
        let (mut session, _ticket) = analyzing(&store);
        assert_eq!(session.retake(), Err(SessionError::Busy));

        session.logout();
        session.login("r.mehta", "pw").unwrap();
        session.select_class("c1").unwrap();
        assert_eq!(session.begin_capture(), Err(SessionError::Busy));
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        session.cancel();
        assert_eq!(session.phase(), Phase::Idle);

        assert_eq!(session.complete_analysis(ticket, completed(&["A"])), Completion::Discarded);
        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.is_busy());

        // The store is untouched by a discarded result.
        assert!(store
            .get_section("c1")
            .unwrap()
            .students
            .iter()
            .all(|s| s.status == AttendanceStatus::Unmarked));
    }

    #[test]
    fn test_completion_for_old_attempt_does_not_apply_to_new_one() {
        let store = store();
        let (mut session, first) = analyzing(&store);
        session.cancel();
        session.complete_analysis(first, completed(&[]));

        session.select_class("c1").unwrap();
        let capture = session.begin_capture().unwrap();
        let second = session
            .capture_succeeded(&capture, image(), store.get_section("c1").unwrap().students)
            .unwrap()
            .unwrap();
        assert_ne!(first, second);

        assert_eq!(session.complete_analysis(first, completed(&["A"])), Completion::Discarded);
        assert_eq!(session.phase(), Phase::Analyzing);
        assert_eq!(session.complete_analysis(second, completed(&["A"])), Completion::Applied);
    }

    #[test]
    fn test_retake_discards_draft_and_returns_to_capturing() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        session.complete_analysis(ticket, completed(&["A"]));
        session.mark_all(AttendanceStatus::Present).unwrap();

        let capture = session.retake().unwrap();
        assert_eq!(capture.class_id, "c1");
        assert_eq!(session.phase(), Phase::Capturing);
        assert!(session.draft().is_err());
        assert!(session.image().is_none());
    }

    #[test]
    fn test_capture_failure_aborts_to_idle() {
        let mut session = Session::new();
        session.login("r.mehta", "pw").unwrap();
        session.select_class("c1").unwrap();
        let capture = session.begin_capture().unwrap();
        assert_eq!(session.capture_failed(&capture), Completion::Applied);
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.draft().is_err());
    }

    #[test]
    fn test_capture_for_earlier_selection_is_discarded() {
        let store = store();
        let mut session = Session::new();
        session.login("r.mehta", "pw").unwrap();
        session.select_class("c1").unwrap();
        let first = session.begin_capture().unwrap();
        session.cancel();
        session.select_class("c1").unwrap();
        let second = session.begin_capture().unwrap();
        assert_ne!(first.attempt, second.attempt);

        let snapshot = store.get_section("c1").unwrap().students;
        assert_eq!(session.capture_succeeded(&first, image(), snapshot.clone()), Ok(None));
        assert_eq!(session.capture_failed(&first), Completion::Discarded);
        assert_eq!(session.phase(), Phase::Capturing);
        assert!(!session.is_busy());

        let ticket = session.capture_succeeded(&second, image(), snapshot).unwrap();
        assert!(ticket.is_some());
        assert_eq!(session.phase(), Phase::Analyzing);
    }

    #[test]
    fn test_logout_discards_draft() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        session.complete_analysis(ticket, completed(&["A"]));
        session.logout();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.operator(), None);
        assert_eq!(session.toggle("A"), Err(SessionError::NotAuthenticated));
    }

    #[test]
    fn test_draft_edits_outside_review_are_rejected() {
        let mut session = Session::new();
        session.login("r.mehta", "pw").unwrap();
        assert!(matches!(
            session.toggle("A"),
            Err(SessionError::InvalidTransition { phase: Phase::Idle, .. })
        ));
        assert!(matches!(
            session.commit(&store()),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_add_student_validation_surfaces() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        session.complete_analysis(ticket, completed(&[]));
        let result = session.add_student(NewStudent::default());
        assert_eq!(result, Err(SessionError::Validation(ValidationError::MissingName)));
        assert_eq!(session.draft().unwrap().students().len(), 2);
    }

    #[test]
    fn test_status_reports_review_counts() {
        let store = store();
        let (mut session, ticket) = analyzing(&store);
        assert!(session.status().busy);
        session.complete_analysis(ticket, completed(&["A"]));

        let status = session.status();
        assert_eq!(status.phase, Phase::Reviewing);
        assert_eq!(status.class_id.as_deref(), Some("c1"));
        assert_eq!(status.total, Some(2));
        assert_eq!(status.present, Some(1));
        assert!(!status.busy);
    }
}
