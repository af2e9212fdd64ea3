//! Scan-confirm controller: runs the state machine on a single actor task.
//!
//! The camera loop and each submission are child tasks that report back over
//! one channel, so every state change happens on the actor. Detections the
//! machine refuses are dropped, never queued.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use super::camera::{CameraError, CameraProvider, FacingMode, StreamGuard};
use super::machine::{ScanMachine, ScanPhase, Submission};
use crate::api::TicketBackend;
use crate::model::{CheckAction, ScanHistoryEntry, ScanRequest, ScanResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerSettings {
    pub event_id: String,
    pub poll_interval: Duration,
    pub facing_mode: FacingMode,
    pub default_action: CheckAction,
}

impl ScannerSettings {
    pub fn from_config(cfg: &crate::config::Scanner, event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            poll_interval: cfg.poll_interval(),
            facing_mode: cfg.facing_mode,
            default_action: cfg.default_action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraState {
    Starting,
    Live,
    Failed(CameraError),
    Stopped,
}

/// Snapshot published to observers after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerView {
    pub phase: ScanPhase,
    pub action: CheckAction,
    pub camera: CameraState,
    pub last_scan: Option<ScanHistoryEntry>,
    pub status: String,
}

impl ScannerView {
    fn snapshot(machine: &ScanMachine, camera: &CameraState) -> Self {
        Self {
            phase: machine.phase().clone(),
            action: machine.action(),
            camera: camera.clone(),
            last_scan: machine.last_scan().cloned(),
            status: machine.status_line(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.phase.error()
    }
}

#[derive(Debug)]
enum Command {
    Confirm,
    Dismiss,
    SetAction(CheckAction),
    ToggleAction,
    Retry,
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Event {
    CameraLive,
    CameraFailed(CameraError),
    Detected(String),
    SubmitFinished(Result<ScanResponse, String>),
}

/// Operator-side handle. Dropping it aborts the actor, which in turn aborts
/// the camera loop and any submission.
pub struct ScannerHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ScannerView>,
    actor: Option<JoinHandle<()>>,
}

impl ScannerHandle {
    pub fn confirm(&self) {
        self.send(Command::Confirm);
    }

    /// "Scan next".
    pub fn dismiss(&self) {
        self.send(Command::Dismiss);
    }

    pub fn set_action(&self, action: CheckAction) {
        self.send(Command::SetAction(action));
    }

    pub fn toggle_action(&self) {
        self.send(Command::ToggleAction);
    }

    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    pub fn view(&self) -> ScannerView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScannerView> {
        self.view.clone()
    }

    /// Stop the camera, cancel in-flight work and wait until the stream is released.
    pub async fn shutdown(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(actor) = self.actor.take() {
            let _ = actor.await;
        }
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("scanner already stopped; command dropped");
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        if let Some(actor) = self.actor.take() {
            actor.abort();
        }
    }
}

pub struct ScanController;

impl ScanController {
    /// Start scanning for `settings.event_id`. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(event_id = %settings.event_id))]
    pub fn start(
        settings: ScannerSettings,
        provider: Arc<dyn CameraProvider>,
        backend: Arc<dyn TicketBackend>,
    ) -> Result<ScannerHandle> {
        if settings.event_id.trim().is_empty() {
            return Err(anyhow!("scanner needs an event id"));
        }
        if settings.poll_interval.is_zero() {
            return Err(anyhow!("scanner poll interval must be > 0"));
        }

        let machine = ScanMachine::new(settings.default_action);
        let camera = CameraState::Starting;
        let (view_tx, view_rx) = watch::channel(ScannerView::snapshot(&machine, &camera));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            settings,
            provider,
            backend,
            machine,
            camera,
            view_tx,
            tasks: JoinSet::new(),
        };
        info!("starting scanner");
        Ok(ScannerHandle {
            commands: cmd_tx,
            view: view_rx,
            actor: Some(tokio::spawn(actor.run(cmd_rx))),
        })
    }
}

struct Actor {
    settings: ScannerSettings,
    provider: Arc<dyn CameraProvider>,
    backend: Arc<dyn TicketBackend>,
    machine: ScanMachine,
    camera: CameraState,
    view_tx: watch::Sender<ScannerView>,
    tasks: JoinSet<()>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (event_tx, mut events) = mpsc::unbounded_channel();

        match self.provider.barcode_detector() {
            None => {
                warn!("no barcode detector available; camera not requested");
                self.camera_failed(CameraError::Unsupported);
            }
            Some(detector) => {
                self.tasks.spawn(camera_loop(
                    self.provider.clone(),
                    detector,
                    self.settings.facing_mode,
                    self.settings.poll_interval,
                    event_tx.clone(),
                ));
            }
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown(done)) => {
                        self.stop().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(cmd) => self.on_command(cmd, &event_tx),
                    None => {
                        self.stop().await;
                        return;
                    }
                },
                Some(event) = events.recv() => self.on_event(event),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            warn!(?err, "scanner task panicked");
                        }
                    }
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command, event_tx: &mpsc::UnboundedSender<Event>) {
        match cmd {
            Command::Confirm => {
                if let Some(submission) = self.machine.confirm() {
                    info!(action = %submission.action, "submitting scan");
                    self.tasks.spawn(submit(
                        self.backend.clone(),
                        self.settings.event_id.clone(),
                        submission,
                        event_tx.clone(),
                    ));
                } else {
                    debug!(phase = self.machine.phase().name(), "confirm ignored");
                }
            }
            Command::Dismiss => {
                if self.machine.dismiss() {
                    debug!("candidate dismissed");
                }
            }
            Command::SetAction(action) => self.machine.set_action(action),
            Command::ToggleAction => self.machine.set_action(self.machine.action().toggled()),
            Command::Retry => {
                // camera failures are terminal; only request failures clear
                if !matches!(self.camera, CameraState::Failed(_)) {
                    self.machine.retry();
                }
            }
            Command::Shutdown(_) => {}
        }
        self.publish();
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::CameraLive => {
                info!("camera live; detection loop running");
                self.camera = CameraState::Live;
            }
            Event::CameraFailed(err) => self.camera_failed(err),
            Event::Detected(code) => {
                if self.machine.on_detection(Some(&code), Utc::now()) {
                    info!("code detected; awaiting confirmation");
                } else {
                    trace!(phase = self.machine.phase().name(), "detection dropped");
                    return;
                }
            }
            Event::SubmitFinished(result) => {
                match &result {
                    Ok(_) => info!("scan committed"),
                    Err(reason) => warn!(%reason, "scan submission failed"),
                }
                self.machine.on_submit_result(result, Utc::now());
            }
        }
        self.publish();
    }

    fn camera_failed(&mut self, err: CameraError) {
        if !err.is_user_visible() {
            debug!("camera acquisition aborted");
            self.camera = CameraState::Stopped;
        } else {
            warn!(?err, "camera unavailable");
            self.machine.fail(err.to_string());
            self.camera = CameraState::Failed(err);
        }
        self.publish();
    }

    async fn stop(&mut self) {
        // aborting drops the stream guard, which stops the tracks
        self.tasks.shutdown().await;
        if !matches!(self.camera, CameraState::Failed(_)) {
            self.camera = CameraState::Stopped;
        }
        self.publish();
        info!("scanner stopped");
    }

    fn publish(&self) {
        self.view_tx
            .send_replace(ScannerView::snapshot(&self.machine, &self.camera));
    }
}

async fn camera_loop(
    provider: Arc<dyn CameraProvider>,
    detector: Arc<dyn super::camera::BarcodeDetector>,
    facing: FacingMode,
    poll_interval: Duration,
    events: mpsc::UnboundedSender<Event>,
) {
    let stream = match provider.open(facing).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.send(Event::CameraFailed(err));
            return;
        }
    };
    let mut guard = StreamGuard::new(stream);
    if let Err(err) = guard.stream().play().await {
        let _ = events.send(Event::CameraFailed(err));
        return;
    }
    if events.send(Event::CameraLive).is_err() {
        return;
    }

    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let frame = match guard.stream().current_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                trace!(?err, "frame grab failed");
                continue;
            }
        };
        match detector.detect(&frame).await {
            Ok(codes) => {
                let Some(code) = codes.into_iter().find(|c| !c.is_empty()) else {
                    continue;
                };
                if events.send(Event::Detected(code)).is_err() {
                    return;
                }
            }
            Err(err) => trace!(?err, "no decodable code in frame"),
        }
    }
}

async fn submit(
    backend: Arc<dyn TicketBackend>,
    event_id: String,
    submission: Submission,
    events: mpsc::UnboundedSender<Event>,
) {
    let request = ScanRequest {
        token: submission.token,
        event_id,
        action: submission.action,
    };
    let result = backend
        .confirm_scan(&request)
        .await
        .map_err(|err| err.to_string());
    let _ = events.send(Event::SubmitFinished(result));
}
