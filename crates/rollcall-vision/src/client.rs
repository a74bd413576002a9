//! Recognition client for the Gemini `generateContent` API.
//!
//! [`Recognizer::analyze`] never fails: any transport, encoding or parse
//! error becomes an [`Analysis::Fallback`] carrying the neutral result.

use crate::error::{is_retryable_status, RecognitionError};
use crate::reference::fetch_reference;
use crate::request::{AnalysisRequest, TASK_PROMPT};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use rollcall_core::{Analysis, AnalysisResult, CapturedImage, Student};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Description shown to the operator when recognition is unavailable.
pub const FALLBACK_DESCRIPTION: &str =
    "Could not analyze image. Please verify internet connection.";

/// Analyses a classroom photo against the roster's reference photos.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn analyze(&self, image: &CapturedImage, roster: &[Student]) -> Analysis;
}

/// Recognition client settings.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Reference photos sent per request, to bound payload size.
    pub max_reference_photos: usize,
    /// Overall budget for one `analyze` call; expiry yields the fallback.
    pub timeout: Duration,
    /// Budget for fetching all reference photos. Must be well under `timeout`.
    pub reference_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            max_reference_photos: 10,
            timeout: Duration::from_secs(30),
            reference_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiRecognizer {
    config: RecognitionConfig,
    http: Client,
}

impl GeminiRecognizer {
    pub fn new(config: RecognitionConfig) -> Result<Self, RecognitionError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    /// Encode the still and up to `max_reference_photos` reference photos.
    ///
    /// Photos are fetched concurrently, in roster order, one batch per
    /// remaining slot under the cap. Students whose photo cannot be fetched
    /// within `reference_timeout` are left out.
    pub async fn build_request(&self, image: &CapturedImage, roster: &[Student]) -> AnalysisRequest {
        let mut builder = AnalysisRequest::builder(self.config.max_reference_photos)
            .image(image.mime_type.clone(), image.bytes.clone());

        let deadline = Instant::now() + self.config.reference_timeout;
        let mut candidates = roster.iter();
        loop {
            let wanted = builder.remaining_capacity();
            if wanted == 0 {
                debug!(cap = self.config.max_reference_photos, "reference cap reached");
                break;
            }
            let batch: Vec<&Student> = candidates.by_ref().take(wanted).collect();
            if batch.is_empty() {
                break;
            }
            let budget = deadline.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                debug!(skipped = batch.len(), "reference photo budget spent");
                break;
            }

            let fetched = join_all(
                batch
                    .iter()
                    .map(|student| fetch_reference(&self.http, &student.photo_url, budget)),
            )
            .await;

            for (student, outcome) in batch.into_iter().zip(fetched) {
                match outcome {
                    Ok(photo) => {
                        builder = builder.reference(&student.id, photo.mime_type, photo.data);
                    }
                    Err(e) => {
                        debug!(student_id = %student.id, error = %e, "skipping reference photo");
                    }
                }
            }
        }

        builder.text(TASK_PROMPT).build()
    }

    /// One analysis with errors surfaced.
    pub async fn try_analyze(
        &self,
        image: &CapturedImage,
        roster: &[Student],
    ) -> Result<AnalysisResult, RecognitionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(RecognitionError::MissingApiKey)?;
        if image.is_empty() {
            return Err(RecognitionError::InvalidResponse("empty classroom image".into()));
        }

        let request = self.build_request(image, roster).await;
        debug!(
            references = request.reference_ids().len(),
            parts = request.parts().len(),
            "recognition request assembled"
        );

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = request.to_body();

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * 2u32.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying recognition call");
                tokio::time::sleep(backoff).await;
            }

            match self.send(&url, api_key, &body).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    debug!(attempt, error = %e, "recognition attempt failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RecognitionError::InvalidResponse("no attempts made".into())))
    }

    async fn send(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<AnalysisResult, RecognitionError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            debug!(status, retryable = is_retryable_status(status), "recognition API error");
            return Err(RecognitionError::ApiError { status, message });
        }

        let envelope: GenerateContentResponse =
            response.json().await.map_err(|e| self.transport_error(e))?;
        parse_envelope(envelope)
    }

    fn transport_error(&self, err: reqwest::Error) -> RecognitionError {
        if err.is_timeout() {
            RecognitionError::Timeout(self.config.timeout)
        } else {
            RecognitionError::Network(err)
        }
    }
}

fn parse_envelope(envelope: GenerateContentResponse) -> Result<AnalysisResult, RecognitionError> {
    let text: String = envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(RecognitionError::InvalidResponse("no response text".into()));
    }
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl Recognizer for GeminiRecognizer {
    async fn analyze(&self, image: &CapturedImage, roster: &[Student]) -> Analysis {
        let outcome = tokio::time::timeout(self.config.timeout, self.try_analyze(image, roster))
            .await
            .unwrap_or(Err(RecognitionError::Timeout(self.config.timeout)));

        match outcome {
            Ok(result) => {
                info!(
                    student_count = result.student_count,
                    is_classroom = result.is_classroom,
                    identified = result.present_student_ids.len(),
                    "classroom analysed"
                );
                Analysis::Completed { result }
            }
            Err(e) => {
                warn!(error = %e, "recognition failed; using fallback result");
                Analysis::Fallback {
                    result: AnalysisResult::fallback(FALLBACK_DESCRIPTION),
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use rollcall_core::Attentiveness;
    use serde_json::json;

    const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

    fn config(base_url: String) -> RecognitionConfig {
        RecognitionConfig {
            api_key: Some("test-key".into()),
            base_url,
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            ..RecognitionConfig::default()
        }
    }

    fn image() -> CapturedImage {
        CapturedImage::jpeg(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    fn student(id: &str, photo_url: String) -> Student {
        Student::new(id, format!("Student {id}"), format!("R{id}"), photo_url)
    }

    fn envelope(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] }
            }]
        })
    }

    #[tokio::test]
    async fn test_successful_analysis() {
        let server = MockServer::start_async().await;
        let api = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(GENERATE_PATH)
                    .header("x-goog-api-key", "test-key");
                then.status(200).json_body(envelope(
                    r#"{"studentCount":3,"isClassroom":true,"environmentDescription":"Rows of desks",
                        "attentivenessScore":"Medium","presentStudentIds":["2","ghost"]}"#,
                ));
            })
            .await;

        let recognizer = GeminiRecognizer::new(config(server.base_url())).unwrap();
        let roster = vec![student("1", "data:image/png;base64,AAAA".into())];
        let analysis = recognizer.analyze(&image(), &roster).await;

        api.assert_async().await;
        assert!(!analysis.is_fallback());
        let result = analysis.result();
        assert_eq!(result.student_count, 3);
        assert_eq!(result.attentiveness_score, Attentiveness::Medium);
        assert!(result.identified("2"));
        assert!(result.identified("ghost"));
    }

    #[tokio::test]
    async fn test_server_error_falls_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(GENERATE_PATH);
                then.status(500).body("internal");
            })
            .await;

        let recognizer = GeminiRecognizer::new(config(server.base_url())).unwrap();
        let analysis = recognizer.analyze(&image(), &[]).await;

        match analysis {
            Analysis::Fallback { result, reason } => {
                assert_eq!(result, AnalysisResult::fallback(FALLBACK_DESCRIPTION));
                assert!(reason.contains("500"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_payload_falls_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(GENERATE_PATH);
                then.status(200).json_body(envelope(r#"{"studentCount":"lots"}"#));
            })
            .await;

        let recognizer = GeminiRecognizer::new(config(server.base_url())).unwrap();
        let analysis = recognizer.analyze(&image(), &[]).await;
        assert!(analysis.is_fallback());
        assert!(analysis.result().present_student_ids.is_empty());
        assert!(!analysis.result().is_classroom);
    }

    #[tokio::test]
    async fn test_empty_candidates_fall_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(GENERATE_PATH);
                then.status(200).json_body(json!({ "candidates": [] }));
            })
            .await;

        let recognizer = GeminiRecognizer::new(config(server.base_url())).unwrap();
        assert!(recognizer.analyze(&image(), &[]).await.is_fallback());
    }

    #[tokio::test]
    async fn test_missing_api_key_falls_back_without_network() {
        let recognizer = GeminiRecognizer::new(RecognitionConfig {
            api_key: None,
            base_url: "http://127.0.0.1:9".into(),
            ..RecognitionConfig::default()
        })
        .unwrap();

        match recognizer.analyze(&image(), &[]).await {
            Analysis::Fallback { reason, .. } => assert!(reason.contains("API key")),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        let recognizer = GeminiRecognizer::new(config("http://127.0.0.1:9".into())).unwrap();
        let analysis = recognizer.analyze(&image(), &[]).await;
        assert!(analysis.is_fallback());
        assert_eq!(analysis.result().student_count, 0);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let server = MockServer::start_async().await;
        let api = server
            .mock_async(|when, then| {
                when.method(POST).path(GENERATE_PATH);
                then.status(503).body("overloaded");
            })
            .await;

        let recognizer = GeminiRecognizer::new(RecognitionConfig {
            max_retries: 2,
            ..config(server.base_url())
        })
        .unwrap();
        assert!(recognizer.analyze(&image(), &[]).await.is_fallback());
        api.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn test_unfetchable_references_are_skipped() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/1.jpg");
                then.status(200).header("content-type", "image/jpeg").body(vec![7u8; 4]);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/2.jpg");
                then.status(404);
            })
            .await;

        let recognizer = GeminiRecognizer::new(config(server.base_url())).unwrap();
        let roster = vec![
            student("1", server.url("/photos/1.jpg")),
            student("2", server.url("/photos/2.jpg")),
            student("3", String::new()),
        ];
        let request = recognizer.build_request(&image(), &roster).await;
        assert_eq!(request.reference_ids(), ["1".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_reference_host_is_skipped() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/2.jpg");
                then.status(200)
                    .header("content-type", "image/jpeg")
                    .body(vec![7u8; 4])
                    .delay(Duration::from_secs(3));
            })
            .await;
        let api = server
            .mock_async(|when, then| {
                when.method(POST).path(GENERATE_PATH);
                then.status(200).json_body(envelope(
                    r#"{"studentCount":1,"isClassroom":true,"environmentDescription":"Desks",
                        "attentivenessScore":"High","presentStudentIds":["1"]}"#,
                ));
            })
            .await;

        let recognizer = GeminiRecognizer::new(RecognitionConfig {
            timeout: Duration::from_secs(2),
            reference_timeout: Duration::from_millis(300),
            ..config(server.base_url())
        })
        .unwrap();
        let roster = vec![
            student("1", "data:image/png;base64,AAAA".into()),
            student("2", server.url("/photos/2.jpg")),
        ];

        let request = recognizer.build_request(&image(), &roster).await;
        assert_eq!(request.reference_ids(), ["1".to_string()]);

        let analysis = recognizer.analyze(&image(), &roster).await;
        assert!(!analysis.is_fallback(), "unexpected fallback: {analysis:?}");
        assert!(analysis.result().identified("1"));
        api.assert_async().await;
    }

    #[tokio::test]
    async fn test_slow_service_times_out_to_fallback() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(GENERATE_PATH);
                then.status(200)
                    .json_body(envelope(
                        r#"{"studentCount":1,"isClassroom":true,"environmentDescription":"Desks",
                            "attentivenessScore":"High","presentStudentIds":["1"]}"#,
                    ))
                    .delay(Duration::from_secs(3));
            })
            .await;

        let recognizer = GeminiRecognizer::new(RecognitionConfig {
            timeout: Duration::from_secs(1),
            ..config(server.base_url())
        })
        .unwrap();

        match recognizer.analyze(&image(), &[]).await {
            Analysis::Fallback { result, reason } => {
                assert_eq!(result, AnalysisResult::fallback(FALLBACK_DESCRIPTION));
                assert!(reason.contains("timeout"), "reason was {reason}");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reference_cap_limits_fetches() {
        let server = MockServer::start_async().await;
        let photos = server
            .mock_async(|when, then| {
                when.method(GET).path("/photo.jpg");
                then.status(200).header("content-type", "image/jpeg").body(vec![1u8]);
            })
            .await;

        let recognizer = GeminiRecognizer::new(RecognitionConfig {
            max_reference_photos: 2,
            ..config(server.base_url())
        })
        .unwrap();
        let roster: Vec<Student> = (0..5)
            .map(|i| student(&i.to_string(), server.url("/photo.jpg")))
            .collect();

        let request = recognizer.build_request(&image(), &roster).await;
        assert_eq!(request.reference_ids().len(), 2);
        photos.assert_calls_async(2).await;
    }
}
