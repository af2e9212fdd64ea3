#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

use doorpass::api::TicketBackend;
use doorpass::model::{ScanRequest, ScanResponse};
use doorpass::scanner::wedge::TextDetector;
use doorpass::scanner::{BarcodeDetector, CameraError, CameraProvider, Frame, MediaStream};
use doorpass::scanner::camera::FacingMode;

/// Scripted backend that records every call.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    token_responses: Arc<Mutex<VecDeque<(Duration, Result<String>)>>>,
    scan_responses: Arc<Mutex<VecDeque<Result<ScanResponse>>>>,
    token_calls: Arc<Mutex<Vec<String>>>,
    scan_calls: Arc<Mutex<Vec<ScanRequest>>>,
    scan_gate: Option<Arc<Semaphore>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingBackend {
    pub fn with_tokens(responses: Vec<Result<String>>) -> Self {
        let delayed = responses.into_iter().map(|r| (Duration::ZERO, r)).collect();
        Self::with_delayed_tokens(delayed)
    }

    pub fn with_delayed_tokens(responses: Vec<(Duration, Result<String>)>) -> Self {
        Self {
            token_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn with_scans(responses: Vec<Result<ScanResponse>>) -> Self {
        Self {
            scan_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    /// Hold every scan request until [`Semaphore::add_permits`] is called on the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.scan_gate = Some(gate.clone());
        (self, gate)
    }

    pub async fn token_calls(&self) -> Vec<String> {
        self.token_calls.lock().await.clone()
    }

    pub async fn scan_calls(&self) -> Vec<ScanRequest> {
        self.scan_calls.lock().await.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketBackend for RecordingBackend {
    async fn issue_display_token(&self, ticket_id: &str) -> Result<String> {
        self.token_calls.lock().await.push(ticket_id.to_string());
        let next = self.token_responses.lock().await.pop_front();
        let (delay, response) = next.unwrap_or((Duration::ZERO, Err(anyhow!("unavailable"))));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }

    async fn confirm_scan(&self, request: &ScanRequest) -> Result<ScanResponse> {
        self.scan_calls.lock().await.push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.scan_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let response = self
            .scan_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(ScanResponse::default()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// How opening the fake camera behaves.
#[derive(Clone, Debug)]
pub enum OpenBehavior {
    Succeed,
    Fail(CameraError),
    /// Opens, but the stream refuses to start playing.
    FailPlay(CameraError),
    Hang,
}

/// Camera whose frames are scripted text codes, one per poll.
#[derive(Clone)]
pub struct FakeCamera {
    pub with_detector: bool,
    pub open: OpenBehavior,
    pub frames: Arc<std::sync::Mutex<VecDeque<String>>>,
    pub opens: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            with_detector: true,
            open: OpenBehavior::Succeed,
            frames: Arc::new(std::sync::Mutex::new(VecDeque::new())),
            opens: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(err: CameraError) -> Self {
        Self {
            open: OpenBehavior::Fail(err),
            ..Self::new()
        }
    }

    pub fn show(&self, code: &str) {
        self.frames.lock().unwrap().push_back(code.to_string());
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraProvider for FakeCamera {
    fn barcode_detector(&self) -> Option<Arc<dyn BarcodeDetector>> {
        if self.with_detector {
            Some(Arc::new(TextDetector))
        } else {
            None
        }
    }

    async fn open(&self, _facing: FacingMode) -> Result<Box<dyn MediaStream>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let stream = |play_error| {
            Box::new(FakeStream {
                frames: self.frames.clone(),
                stops: self.stops.clone(),
                play_error,
            }) as Box<dyn MediaStream>
        };
        match &self.open {
            OpenBehavior::Succeed => Ok(stream(None)),
            OpenBehavior::FailPlay(err) => Ok(stream(Some(err.clone()))),
            OpenBehavior::Fail(err) => Err(err.clone()),
            OpenBehavior::Hang => std::future::pending().await,
        }
    }
}

struct FakeStream {
    frames: Arc<std::sync::Mutex<VecDeque<String>>>,
    stops: Arc<AtomicUsize>,
    play_error: Option<CameraError>,
}

#[async_trait]
impl MediaStream for FakeStream {
    async fn play(&mut self) -> Result<(), CameraError> {
        match self.play_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn current_frame(&mut self) -> Result<Option<Frame>> {
        let next = self.frames.lock().unwrap().pop_front();
        Ok(next.map(|code| Frame::new(code.into_bytes(), 1, 1)))
    }

    fn stop_tracks(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
