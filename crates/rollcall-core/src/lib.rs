//! rollcall-core: Attendance reconciliation engine.
//!
//! Holds the in-memory roster, derives attendance from recognition
//! results, and drives the operator session through review and commit.

pub mod reconcile;
pub mod roster;
pub mod seed;
pub mod session;
pub mod types;

pub use reconcile::{derive_statuses, Draft, NewStudent, ValidationError, AUTOMATED_MATCH_CONFIDENCE};
pub use roster::{RosterError, RosterStore, SectionProgress};
pub use session::{
    AnalysisTicket, CaptureTicket, CommitReceipt, Completion, Phase, Session, SessionError,
    SessionStatus,
};
pub use types::{
    Analysis, AnalysisResult, Attentiveness, AttendanceStatus, CapturedImage, ClassSection, Student,
};
