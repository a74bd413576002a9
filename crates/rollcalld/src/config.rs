use rollcall_vision::RecognitionConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Serve stills from this image file instead of opening a camera.
    pub image_path: Option<PathBuf>,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// JPEG quality for encoded stills.
    pub jpeg_quality: u8,
    /// Roster seed file; the embedded seed is used when unset.
    pub roster_path: Option<PathBuf>,
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    /// Reference photos sent per recognition request.
    pub max_reference_photos: usize,
    /// Budget in seconds for one recognition call.
    pub analyze_timeout_secs: u64,
    /// Budget in seconds for fetching reference photos, capped at half the analysis budget.
    pub reference_timeout_secs: u64,
    pub max_retries: u32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = RecognitionConfig::default();

        let api_key = env_string("ROLLCALL_API_KEY").or_else(|| env_string("GEMINI_API_KEY"));

        Self {
            camera_device: env_string("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            image_path: env_string("ROLLCALL_IMAGE_PATH").map(PathBuf::from),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            jpeg_quality: env_u8("ROLLCALL_JPEG_QUALITY", 80),
            roster_path: env_string("ROLLCALL_ROSTER_PATH").map(PathBuf::from),
            api_key,
            model: env_string("ROLLCALL_MODEL").unwrap_or(defaults.model),
            api_base_url: env_string("ROLLCALL_API_BASE_URL").unwrap_or(defaults.base_url),
            max_reference_photos: env_usize(
                "ROLLCALL_MAX_REFERENCE_PHOTOS",
                defaults.max_reference_photos,
            ),
            analyze_timeout_secs: env_u64(
                "ROLLCALL_ANALYZE_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            ),
            reference_timeout_secs: env_u64(
                "ROLLCALL_REFERENCE_TIMEOUT_SECS",
                defaults.reference_timeout.as_secs(),
            ),
            max_retries: env_u32("ROLLCALL_MAX_RETRIES", defaults.max_retries),
        }
    }

    /// Settings for the recognition client.
    pub fn recognition(&self) -> RecognitionConfig {
        let timeout = Duration::from_secs(self.analyze_timeout_secs);
        RecognitionConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            base_url: self.api_base_url.clone(),
            max_reference_photos: self.max_reference_photos,
            timeout,
            reference_timeout: Duration::from_secs(self.reference_timeout_secs).min(timeout / 2),
            max_retries: self.max_retries,
            ..RecognitionConfig::default()
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u8(key: &str, default: u8) -> u8 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            camera_device: "/dev/video0".into(),
            image_path: None,
            warmup_frames: 4,
            jpeg_quality: 80,
            roster_path: None,
            api_key: Some("key".into()),
            model: "gemini-2.5-flash".into(),
            api_base_url: "http://localhost".into(),
            max_reference_photos: 10,
            analyze_timeout_secs: 30,
            reference_timeout_secs: 5,
            max_retries: 2,
        }
    }

    #[test]
    fn test_recognition_settings() {
        let rec = config().recognition();
        assert_eq!(rec.timeout, Duration::from_secs(30));
        assert_eq!(rec.reference_timeout, Duration::from_secs(5));
        assert_eq!(rec.max_reference_photos, 10);
        assert_eq!(rec.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_reference_budget_leaves_room_for_analysis() {
        let rec = Config {
            analyze_timeout_secs: 4,
            reference_timeout_secs: 10,
            ..config()
        }
        .recognition();
        assert_eq!(rec.reference_timeout, Duration::from_secs(2));
    }
}
