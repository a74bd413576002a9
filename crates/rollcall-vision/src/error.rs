//! Recognition error types.
//!
//! None of these reach callers of [`crate::Recognizer::analyze`]; they are
//! converted into a fallback result and recorded as its reason.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reference photo unavailable: {0}")]
    Reference(String),
}

impl RecognitionError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RecognitionError::ApiError { status, .. } => is_retryable_status(*status),
            RecognitionError::Network(_) => true,
            RecognitionError::Timeout(_) => true,
            RecognitionError::MissingApiKey
            | RecognitionError::InvalidResponse(_)
            | RecognitionError::Json(_)
            | RecognitionError::Reference(_) => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
