//! Attendance reconciliation.
//!
//! [`derive_statuses`] turns a recognition result into per-student status.
//! [`Draft`] holds the editable copy the operator reviews before commit.

use crate::types::{AnalysisResult, AttendanceStatus, Student};
use thiserror::Error;

/// Confidence attached to every automated positive match.
pub const AUTOMATED_MATCH_CONFIDENCE: f32 = 0.95;

const PLACEHOLDER_AVATAR_BASE: &str = "https://ui-avatars.com/api/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("student name is required")]
    MissingName,
    #[error("roll number is required")]
    MissingRollNumber,
}

/// Overwrite every student's status from a recognition result.
///
/// Identified students become `PRESENT` with [`AUTOMATED_MATCH_CONFIDENCE`];
/// everyone else becomes `ABSENT` with no confidence. Prior status and
/// confidence are ignored, so the mapping is idempotent.
pub fn derive_statuses(students: &[Student], result: &AnalysisResult) -> Vec<Student> {
    students
        .iter()
        .map(|student| {
            let identified = result.identified(&student.id);
            Student {
                status: if identified {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                },
                confidence: identified.then_some(AUTOMATED_MATCH_CONFIDENCE),
                ..student.clone()
            }
        })
        .collect()
}

/// Fields entered by the operator for a student the automated pass missed.
#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub name: String,
    pub roll_number: String,
    /// Uploaded photo (URL or data URL). A generated avatar is used when absent.
    pub photo_url: Option<String>,
}

/// Present/total counts shown in the review header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftSummary {
    pub total: usize,
    pub present: usize,
}

/// The in-progress, uncommitted copy of a section's students.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Draft {
    students: Vec<Student>,
}

impl Draft {
    pub fn new(students: Vec<Student>) -> Self {
        Self { students }
    }

    /// Draft seeded by automated derivation.
    pub fn derived(students: &[Student], result: &AnalysisResult) -> Self {
        Self::new(derive_statuses(students, result))
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn into_students(self) -> Vec<Student> {
        self.students
    }

    pub fn get(&self, student_id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == student_id)
    }

    /// Flip one student between `PRESENT` and `ABSENT`.
    ///
    /// Anything not `PRESENT` becomes `PRESENT`. Unknown ids are a no-op;
    /// returns whether a student was found.
    pub fn toggle(&mut self, student_id: &str) -> bool {
        let Some(student) = self.students.iter_mut().find(|s| s.id == student_id) else {
            tracing::debug!(student_id, "toggle: unknown student id ignored");
            return false;
        };
        student.status = if student.status == AttendanceStatus::Present {
            AttendanceStatus::Absent
        } else {
            AttendanceStatus::Present
        };
        student.confidence = None;
        true
    }

    /// Set every student to `status`, clearing all confidence.
    pub fn mark_all(&mut self, status: AttendanceStatus) {
        for student in &mut self.students {
            student.status = status;
            student.confidence = None;
        }
    }

    pub fn unmark_all(&mut self) {
        self.mark_all(AttendanceStatus::Absent);
    }

    /// Append a manually found student, marked `PRESENT`.
    ///
    /// Rejects blank names or roll numbers and leaves the draft unchanged.
    pub fn add_student(&mut self, new: NewStudent) -> Result<Student, ValidationError> {
        let name = new.name.trim();
        let roll_number = new.roll_number.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if roll_number.is_empty() {
            return Err(ValidationError::MissingRollNumber);
        }

        let photo_url = match new.photo_url.filter(|p| !p.trim().is_empty()) {
            Some(photo) => photo,
            None => placeholder_avatar(name),
        };

        let id = self.fresh_id();
        tracing::info!(student_id = %id, roll_number, "draft: manual student added");
        let student = Student {
            status: AttendanceStatus::Present,
            ..Student::new(id, name, roll_number, photo_url)
        };
        self.students.push(student.clone());
        Ok(student)
    }

    pub fn summary(&self) -> DraftSummary {
        DraftSummary {
            total: self.students.len(),
            present: self.students.iter().filter(|s| s.is_present()).count(),
        }
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = format!("manual_{}", uuid::Uuid::new_v4().simple());
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}

/// Generated initials avatar keyed by the student's name.
pub fn placeholder_avatar(name: &str) -> String {
    match url::Url::parse_with_params(
        PLACEHOLDER_AVATAR_BASE,
        &[("name", name), ("background", "random"), ("color", "fff")],
    ) {
        Ok(url) => url.into(),
        Err(_) => PLACEHOLDER_AVATAR_BASE.to_string(),
    }
}
