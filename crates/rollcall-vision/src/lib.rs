//! rollcall-vision: Classroom photo analysis via a remote vision model.
//!
//! Sends one classroom still plus the roster's reference photos in a
//! single request and parses a strictly-typed JSON answer. Failures never
//! reach the caller: they degrade to a neutral fallback result.

pub mod client;
pub mod error;
pub mod reference;
pub mod request;

pub use client::{GeminiRecognizer, RecognitionConfig, Recognizer, FALLBACK_DESCRIPTION};
pub use error::RecognitionError;
pub use request::{AnalysisRequest, ContentPart};
