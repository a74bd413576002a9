//! rollcall-hw: Classroom still capture.
//!
//! Provides V4L2-based camera access, an image-file source for cameras
//! that are managed elsewhere, and JPEG encoding of captured frames.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::{ImageFileSource, StillSource};
