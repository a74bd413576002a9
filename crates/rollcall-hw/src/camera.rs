//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::StillSource;
use rollcall_core::CapturedImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no usable frame after {0} attempts")]
    NoUsableFrame(usize),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel), converted to RGB then JPEG.
    Yuyv,
    /// Motion-JPEG: each buffer is already a JPEG still.
    Mjpeg,
}

/// Raw captures tried per still before giving up on dark frames.
const MAX_STILL_ATTEMPTS: usize = 8;

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    jpeg_quality: u8,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, jpeg_quality: u8) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(device_path.to_string())
            }
            _ if e.to_string().contains("busy") || e.to_string().contains("EBUSY") => {
                CameraError::DeviceBusy
            }
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for 1280x720 YUYV; webcams that only stream at that size in
        // MJPEG will answer with MJPG, which is accepted as-is.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 1280;
        fmt.height = 720;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or MJPG)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            jpeg_quality,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Capture one still, skipping dark frames.
    ///
    /// Tries up to `MAX_STILL_ATTEMPTS` raw captures; returns the first
    /// frame that is not dark, encoded as JPEG.
    pub fn capture(&self) -> Result<CapturedImage, CameraError> {
        let mut stream = self.stream()?;

        for _ in 0..MAX_STILL_ATTEMPTS {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;

            match self.pixel_format {
                PixelFormat::Yuyv => {
                    let rgb = frame::yuyv_to_rgb(buf, self.width, self.height).map_err(|e| {
                        CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))
                    })?;
                    let frame = Frame::from_rgb(rgb, self.width, self.height, meta.sequence);
                    if frame.is_dark {
                        tracing::debug!(seq = meta.sequence, "skipping dark frame");
                        continue;
                    }
                    return frame.encode_jpeg(self.jpeg_quality).map_err(|e| {
                        CameraError::CaptureFailed(format!("JPEG encoding failed: {e}"))
                    });
                }
                PixelFormat::Mjpeg => {
                    let used = (meta.bytesused as usize).min(buf.len());
                    if used == 0 {
                        continue;
                    }
                    return Ok(CapturedImage::jpeg(buf[..used].to_vec()));
                }
            }
        }

        Err(CameraError::NoUsableFrame(MAX_STILL_ATTEMPTS))
    }

    /// Discard frames so auto exposure can settle.
    pub fn discard_frames(&self, count: usize) -> Result<(), CameraError> {
        let mut stream = self.stream()?;
        for _ in 0..count {
            stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
        }
        Ok(())
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl StillSource for Camera {
    fn capture_still(&self) -> Result<CapturedImage, CameraError> {
        self.capture()
    }

    fn warm_up(&self, frames: usize) -> Result<(), CameraError> {
        self.discard_frames(frames)
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} {:?})", self.device_path, self.width, self.height, self.pixel_format)
    }
}
