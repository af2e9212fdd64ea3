//! Keyboard-wedge reader: a USB/Bluetooth barcode scanner that presents
//! itself as a keyboard and types each decoded code followed by Enter.
//!
//! The "frame" is the last line typed since the previous poll; decoding is a
//! UTF-8 read of it. Lines typed while a frame is still unread replace it,
//! matching a camera where only the current picture is visible.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::camera::{
    BarcodeDetector, CameraError, CameraProvider, FacingMode, Frame, MediaStream,
};

/// Feeds typed lines into a [`WedgeProvider`].
#[derive(Clone)]
pub struct WedgeInput {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl WedgeInput {
    /// Push one scanned line. Surrounding whitespace is stripped.
    pub fn push(&self, line: &str) {
        let code = line.trim();
        if code.is_empty() {
            return;
        }
        self.tx.send_replace(Some(code.to_string()));
    }
}

pub struct WedgeProvider {
    rx: watch::Receiver<Option<String>>,
}

impl WedgeProvider {
    pub fn channel() -> (Self, WedgeInput) {
        let (tx, rx) = watch::channel(None);
        (Self { rx }, WedgeInput { tx: Arc::new(tx) })
    }
}

#[async_trait]
impl CameraProvider for WedgeProvider {
    fn barcode_detector(&self) -> Option<Arc<dyn BarcodeDetector>> {
        Some(Arc::new(TextDetector))
    }

    async fn open(&self, _facing: FacingMode) -> Result<Box<dyn MediaStream>, CameraError> {
        let mut rx = self.rx.clone();
        // lines typed before the stream opened are not part of it
        rx.mark_unchanged();
        Ok(Box::new(WedgeStream { rx, stopped: false }))
    }
}

struct WedgeStream {
    rx: watch::Receiver<Option<String>>,
    stopped: bool,
}

#[async_trait]
impl MediaStream for WedgeStream {
    async fn play(&mut self) -> Result<(), CameraError> {
        if self.stopped {
            return Err(CameraError::Other("stream already stopped".into()));
        }
        Ok(())
    }

    async fn current_frame(&mut self) -> Result<Option<Frame>> {
        if self.stopped {
            return Ok(None);
        }
        let changed = self
            .rx
            .has_changed()
            .context("keyboard input closed")?;
        if !changed {
            return Ok(None);
        }
        let line = self.rx.borrow_and_update().clone();
        Ok(line.map(|code| {
            let width = code.len() as u32;
            Frame::new(code.into_bytes(), width, 1)
        }))
    }

    fn stop_tracks(&mut self) {
        self.stopped = true;
    }
}

/// Decodes a wedge frame as the UTF-8 text it carries.
pub struct TextDetector;

#[async_trait]
impl BarcodeDetector for TextDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<String>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(&frame.data).context("frame is not UTF-8 text")?;
        Ok(vec![text.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_latest_line_is_visible() {
        let (provider, input) = WedgeProvider::channel();
        let mut stream = provider.open(FacingMode::Environment).await.unwrap();
        stream.play().await.unwrap();
        assert!(stream.current_frame().await.unwrap().is_none());

        input.push("  first \n");
        input.push("second");
        let frame = stream.current_frame().await.unwrap().unwrap();
        let codes = TextDetector.detect(&frame).await.unwrap();
        assert_eq!(codes, vec!["second".to_string()]);
        // consumed
        assert!(stream.current_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_lines_and_stopped_streams_yield_nothing() {
        let (provider, input) = WedgeProvider::channel();
        let mut stream = provider.open(FacingMode::Environment).await.unwrap();
        input.push("   ");
        assert!(stream.current_frame().await.unwrap().is_none());
        input.push("code");
        stream.stop_tracks();
        assert!(stream.current_frame().await.unwrap().is_none());
        assert!(stream.play().await.is_err());
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error() {
        let frame = Frame::new(vec![0xff, 0xfe], 2, 1);
        assert!(TextDetector.detect(&frame).await.is_err());
    }
}
