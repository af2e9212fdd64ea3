//! Camera and barcode-detector capabilities the scanner is built on.
//!
//! Platforms plug in through [`CameraProvider`]. A provider without a
//! detector is treated as unsupported and its camera is never opened.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use crate::config::FacingMode;

/// Why the camera could not be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("QR scanning is not supported on this device.")]
    Unsupported,
    #[error("Camera access denied.")]
    PermissionDenied,
    #[error("No camera found on this device.")]
    NoDevice,
    #[error("Camera is already in use by another application.")]
    Busy,
    /// Acquisition was cancelled on purpose, e.g. the scanner shut down.
    #[error("camera acquisition aborted")]
    Aborted,
    #[error("Unable to start the camera.")]
    Other(String),
}

/// Linux `EBUSY`.
const EBUSY: i32 = 16;

impl CameraError {
    /// Classify a platform media error by name (`NotAllowedError`, `NotReadableError`, ...).
    pub fn from_platform_name(name: &str, detail: impl Into<String>) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                CameraError::PermissionDenied
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                CameraError::NoDevice
            }
            "NotReadableError" | "TrackStartError" => CameraError::Busy,
            "AbortError" => CameraError::Aborted,
            _ => CameraError::Other(detail.into()),
        }
    }

    /// Whether the failure should be shown to the operator.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, CameraError::Aborted)
    }
}

impl From<io::Error> for CameraError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
            io::ErrorKind::NotFound => CameraError::NoDevice,
            io::ErrorKind::Interrupted => CameraError::Aborted,
            _ if err.raw_os_error() == Some(EBUSY) => CameraError::Busy,
            _ => CameraError::Other(err.to_string()),
        }
    }
}

/// One polled video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A live video stream.
#[async_trait]
pub trait MediaStream: Send {
    /// Attach the stream for display and start playback.
    async fn play(&mut self) -> Result<(), CameraError>;

    /// Grab the frame currently on screen; `None` when nothing new is available.
    async fn current_frame(&mut self) -> Result<Option<Frame>>;

    /// Stop every track. Must be idempotent.
    fn stop_tracks(&mut self);
}

/// Decodes barcodes out of frames.
#[async_trait]
pub trait BarcodeDetector: Send + Sync {
    /// Raw values of the codes found in `frame`, in detection order.
    async fn detect(&self, frame: &Frame) -> Result<Vec<String>>;
}

/// Platform capabilities, injected so tests can supply fakes.
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// `None` when the platform cannot decode barcodes at all.
    fn barcode_detector(&self) -> Option<Arc<dyn BarcodeDetector>>;

    async fn open(&self, facing: FacingMode) -> Result<Box<dyn MediaStream>, CameraError>;
}

/// Owns a media stream and stops its tracks when dropped, whatever the exit path.
pub struct StreamGuard {
    stream: Box<dyn MediaStream>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        Self { stream }
    }

    pub fn stream(&mut self) -> &mut dyn MediaStream {
        self.stream.as_mut()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        debug!("stopping camera tracks");
        self.stream.stop_tracks();
    }
}
