//! Request assembly for the recognition service.
//!
//! A request is an ordered list of typed content parts plus a response
//! schema. [`AnalysisRequestBuilder`] enforces the reference-photo cap.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

/// Task prompt sent after the classroom image and reference photos.
pub const TASK_PROMPT: &str = "Analyze the first image, a classroom photo, for a school attendance system. \
The remaining images are reference photos of enrolled students, each preceded by its student ID. \
1. Estimate the count of students visible. \
2. Is this likely a classroom setting? \
3. Rate the attentiveness as High, Medium or Low based on visual cues. \
4. List in presentStudentIds the IDs of reference students whose faces appear in the classroom photo. \
Return JSON.";

/// One ordered element of a multimodal request.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Image { mime_type: String, data: Vec<u8> },
    Text(String),
}

impl ContentPart {
    fn to_json(&self) -> Value {
        match self {
            ContentPart::Image { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": STANDARD.encode(data),
                }
            }),
            ContentPart::Text(text) => json!({ "text": text }),
        }
    }
}

/// A fully assembled analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    parts: Vec<ContentPart>,
    reference_ids: Vec<String>,
}

impl AnalysisRequest {
    pub fn builder(max_references: usize) -> AnalysisRequestBuilder {
        AnalysisRequestBuilder {
            parts: Vec::new(),
            reference_ids: Vec::new(),
            max_references,
        }
    }

    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    /// Student ids whose reference photos made it into the request.
    pub fn reference_ids(&self) -> &[String] {
        &self.reference_ids
    }

    /// Body for a `generateContent` call, with a strict JSON response schema.
    pub fn to_body(&self) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": self.parts.iter().map(ContentPart::to_json).collect::<Vec<_>>(),
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            }
        })
    }
}

pub struct AnalysisRequestBuilder {
    parts: Vec<ContentPart>,
    reference_ids: Vec<String>,
    max_references: usize,
}

impl AnalysisRequestBuilder {
    /// The classroom photo. Call once, before any references.
    pub fn image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.parts.push(ContentPart::Image {
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(ContentPart::Text(text.into()));
        self
    }

    /// Whether another reference photo fits under the cap.
    pub fn has_reference_capacity(&self) -> bool {
        self.remaining_capacity() > 0
    }

    /// Reference photos that still fit under the cap.
    pub fn remaining_capacity(&self) -> usize {
        self.max_references.saturating_sub(self.reference_ids.len())
    }

    /// Add a labelled reference photo. Ignored once the cap is reached.
    pub fn reference(mut self, student_id: &str, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        if !self.has_reference_capacity() {
            tracing::debug!(student_id, cap = self.max_references, "reference cap reached");
            return self;
        }
        self.parts.push(ContentPart::Text(format!(
            "Reference photo for student ID: {student_id}"
        )));
        self.parts.push(ContentPart::Image {
            mime_type: mime_type.into(),
            data,
        });
        self.reference_ids.push(student_id.to_string());
        self
    }

    pub fn build(self) -> AnalysisRequest {
        AnalysisRequest {
            parts: self.parts,
            reference_ids: self.reference_ids,
        }
    }
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "studentCount": { "type": "INTEGER" },
            "isClassroom": { "type": "BOOLEAN" },
            "environmentDescription": { "type": "STRING" },
            "attentivenessScore": {
                "type": "STRING",
                "description": "High, Medium, or Low based on visual cues"
            },
            "presentStudentIds": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": [
            "studentCount",
            "isClassroom",
            "environmentDescription",
            "attentivenessScore",
            "presentStudentIds"
        ]
    })
}
