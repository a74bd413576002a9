//! Reference photo retrieval.
//!
//! Photos are either `http(s)` URLs fetched with the shared client or
//! `data:` URLs carried inline (uploads made during review).

use crate::error::RecognitionError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_MIME: &str = "image/jpeg";

/// A fetched reference image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePhoto {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Fetch one reference photo. `timeout` bounds an HTTP fetch end to end.
pub async fn fetch_reference(
    http: &Client,
    url: &str,
    timeout: Duration,
) -> Result<ReferencePhoto, RecognitionError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(RecognitionError::Reference("empty photo URL".into()));
    }
    if let Some(rest) = url.strip_prefix("data:") {
        return decode_data_url(rest);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(RecognitionError::Reference(format!("unsupported photo URL: {url}")));
    }

    let response = http.get(url).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RecognitionError::Reference(format!("{url}: HTTP {}", status.as_u16())));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| v.starts_with("image/"))
        .unwrap_or_else(|| DEFAULT_MIME.to_string());

    let data = response.bytes().await?.to_vec();
    if data.is_empty() {
        return Err(RecognitionError::Reference(format!("{url}: empty body")));
    }
    Ok(ReferencePhoto { mime_type, data })
}

/// Decode the part of a data URL after `data:` (`<mime>;base64,<payload>`).
fn decode_data_url(rest: &str) -> Result<ReferencePhoto, RecognitionError> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| RecognitionError::Reference("data URL has no payload".into()))?;
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err(RecognitionError::Reference("data URL is not base64".into()));
    };
    let data = STANDARD
        .decode(payload.trim())
        .map_err(|e| RecognitionError::Reference(format!("bad base64 in data URL: {e}")))?;
    let mime_type = if mime.is_empty() { DEFAULT_MIME } else { mime };
    Ok(ReferencePhoto {
        mime_type: mime_type.to_string(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const PHOTO_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_data_url_decodes() {
        let photo = fetch_reference(&Client::new(), "data:image/png;base64,aGVsbG8=", PHOTO_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(photo.mime_type, "image/png");
        assert_eq!(photo.data, b"hello");
    }

    #[tokio::test]
    async fn test_data_url_without_base64_is_rejected() {
        let result = fetch_reference(&Client::new(), "data:text/plain,hello", PHOTO_TIMEOUT).await;
        assert!(matches!(result, Err(RecognitionError::Reference(_))));
    }

    #[tokio::test]
    async fn test_http_photo_uses_content_type() {
        let server = MockServer::start_async().await;
        let photo_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/1.png");
                then.status(200)
                    .header("content-type", "image/png; charset=binary")
                    .body(vec![1u8, 2, 3]);
            })
            .await;

        let photo = fetch_reference(&Client::new(), &server.url("/photos/1.png"), PHOTO_TIMEOUT)
.await
            .unwrap();
        photo_mock.assert_async().await;
        assert_eq!(photo.mime_type, "image/png");
        assert_eq!(photo.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_http_error_status_is_reference_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/missing.jpg");
                then.status(404);
            })
            .await;

        let result =
            fetch_reference(&Client::new(), &server.url("/photos/missing.jpg"), PHOTO_TIMEOUT).await;
        assert!(matches!(result, Err(RecognitionError::Reference(msg)) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_slow_photo_host_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/photos/slow.jpg");
                then.status(200)
                    .header("content-type", "image/jpeg")
                    .body(vec![1u8])
                    .delay(Duration::from_secs(3));
            })
            .await;

        let started = std::time::Instant::now();
        let result = fetch_reference(
            &Client::new(),
            &server.url("/photos/slow.jpg"),
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(RecognitionError::Network(e)) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let result = fetch_reference(&Client::new(), "ftp://example.test/a.jpg", PHOTO_TIMEOUT).await;
        assert!(matches!(result, Err(RecognitionError::Reference(_))));
    }
}
