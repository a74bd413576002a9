use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Attendance status of one student for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Unmarked,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Unmarked => "UNMARKED",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    /// Case-insensitive parse of the wire names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            "LATE" => Ok(AttendanceStatus::Late),
            "UNMARKED" => Ok(AttendanceStatus::Unmarked),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// An enrolled student.
///
/// `confidence` is only ever set by automated derivation; any manual edit
/// clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    /// Reference image, shown to the operator and sent to recognition.
    pub photo_url: String,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Student {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        roll_number: impl Into<String>,
        photo_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roll_number: roll_number.into(),
            photo_url: photo_url.into(),
            status: AttendanceStatus::Unmarked,
            confidence: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.status == AttendanceStatus::Present
    }
}

/// A class section and its loaded students.
///
/// `total_students` is the declared capacity and may exceed `students.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSection {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub total_students: u32,
    pub students: Vec<Student>,
}

/// Categorical attentiveness estimate returned by the recognition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Attentiveness {
    High,
    Medium,
    Low,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Structured output of the recognition service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub student_count: u32,
    pub is_classroom: bool,
    pub environment_description: String,
    pub attentiveness_score: Attentiveness,
    /// Ids positively matched against reference photos. May contain ids
    /// outside the roster.
    #[serde(default)]
    pub present_student_ids: BTreeSet<String>,
}

impl AnalysisResult {
    /// The neutral result substituted whenever recognition cannot complete.
    pub fn fallback(description: impl Into<String>) -> Self {
        Self {
            student_count: 0,
            is_classroom: false,
            environment_description: description.into(),
            attentiveness_score: Attentiveness::Unknown,
            present_student_ids: BTreeSet::new(),
        }
    }

    pub fn identified(&self, student_id: &str) -> bool {
        self.present_student_ids.contains(student_id)
    }
}

/// Outcome of one recognition call. Both variants count as completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Analysis {
    Completed { result: AnalysisResult },
    Fallback { result: AnalysisResult, reason: String },
}

impl Analysis {
    pub fn result(&self) -> &AnalysisResult {
        match self {
            Analysis::Completed { result } | Analysis::Fallback { result, .. } => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Analysis::Fallback { .. })
    }
}

/// One still image captured from the classroom camera.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    /// MIME type of `bytes` (e.g., "image/jpeg").
    pub mime_type: String,
}

impl CapturedImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "image/jpeg".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
