use crate::config::Config;
use rollcall_core::CapturedImage;
use rollcall_hw::{Camera, CameraError, ImageFileSource, StillSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
    #[error("capture thread exited")]
    ChannelClosed,
}

/// Messages sent from the session controller to the capture thread.
enum EngineRequest {
    Capture {
        reply: oneshot::Sender<Result<CapturedImage, CameraError>>,
    },
}

/// Clone-safe handle to the capture thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request one classroom still.
    pub async fn capture(&self) -> Result<CapturedImage, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Open the configured still source: an image file when
/// `ROLLCALL_IMAGE_PATH` is set, otherwise the V4L2 camera.
pub fn open_source(config: &Config) -> Result<Box<dyn StillSource>, CameraError> {
    match &config.image_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using image file as still source");
            Ok(Box::new(ImageFileSource::new(path, config.jpeg_quality)))
        }
        None => {
            let camera = Camera::open(&config.camera_device, config.jpeg_quality)?;
            tracing::info!(
                device = %config.camera_device,
                width = camera.width,
                height = camera.height,
                fourcc = ?camera.fourcc,
                "camera opened"
            );
            Ok(Box::new(camera))
        }
    }
}

/// Spawn the capture engine on a dedicated OS thread.
///
/// Discards warmup frames, then serves capture requests one at a time.
pub fn spawn_engine(
    source: Box<dyn StillSource>,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        if let Err(e) = source.warm_up(warmup_frames) {
            tracing::warn!(error = %e, "warmup failed; continuing");
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-capture".into())
        .spawn(move || {
            tracing::info!(source = %source.describe(), "capture thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture { reply } => {
                        let result = source.capture_still();
                        match &result {
                            Ok(still) => tracing::debug!(bytes = still.len(), "still captured"),
                            Err(e) => tracing::warn!(error = %e, "still capture failed"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("capture thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
