//! Still image sources.

use crate::camera::CameraError;
use crate::frame::Frame;
use image::ImageFormat;
use rollcall_core::CapturedImage;
use std::path::PathBuf;

/// Anything that can produce one classroom still on request.
pub trait StillSource: Send {
    fn capture_still(&self) -> Result<CapturedImage, CameraError>;

    /// Discard startup frames. No-op for sources without exposure control.
    fn warm_up(&self, _frames: usize) -> Result<(), CameraError> {
        Ok(())
    }

    fn describe(&self) -> String;
}

/// Serves a still from an image file on every capture.
///
/// JPEG files are passed through; other formats are re-encoded to JPEG.
pub struct ImageFileSource {
    path: PathBuf,
    jpeg_quality: u8,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            path: path.into(),
            jpeg_quality,
        }
    }
}

impl StillSource for ImageFileSource {
    fn capture_still(&self) -> Result<CapturedImage, CameraError> {
        let bytes = std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CameraError::DeviceNotFound(self.path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(self.path.display().to_string())
            }
            _ => CameraError::CaptureFailed(format!("{}: {e}", self.path.display())),
        })?;

        if matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg)) {
            return Ok(CapturedImage::jpeg(bytes));
        }

        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", self.path.display())))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        Frame::from_rgb(decoded.into_raw(), width, height, 0)
            .encode_jpeg(self.jpeg_quality)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
