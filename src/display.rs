//! Rotating token display: keeps a ticket's QR credential fresh.
//!
//! Two independent tasks run per ticket. The refresh task exchanges the
//! ticket id for a new display token on every tick and publishes the newest
//! result; the countdown task only publishes a cosmetic progress value.
//! Neither task reads the other's state.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::TicketBackend;
use crate::model::DisplayToken;

/// Shortest span the countdown bar is stretched over.
const MIN_PROGRESS_SPAN: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub refresh_interval: Duration,
    pub progress_tick: Duration,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(15_000),
            progress_tick: Duration::from_millis(100),
        }
    }
}

impl From<&crate::config::Display> for DisplaySettings {
    fn from(cfg: &crate::config::Display) -> Self {
        Self {
            refresh_interval: cfg.refresh_interval(),
            progress_tick: cfg.progress_tick(),
        }
    }
}

/// Handle owning both timers for one displayed ticket. Dropping it stops them.
pub struct RotatingTokenDisplay {
    backend: Arc<dyn TicketBackend>,
    settings: DisplaySettings,
    ticket_id: String,
    token_tx: watch::Sender<DisplayToken>,
    progress_tx: watch::Sender<f64>,
    refresh: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

impl RotatingTokenDisplay {
    /// Start refreshing `ticket_id`. Must be called inside a tokio runtime.
    /// Both intervals must be non-zero.
    pub fn start(
        backend: Arc<dyn TicketBackend>,
        ticket_id: impl Into<String>,
        settings: DisplaySettings,
    ) -> Result<Self> {
        if settings.refresh_interval.is_zero() {
            return Err(anyhow!("display refresh interval must be > 0"));
        }
        if settings.progress_tick.is_zero() {
            return Err(anyhow!("display progress tick must be > 0"));
        }
        let ticket_id = ticket_id.into();
        let (token_tx, _) = watch::channel(DisplayToken::fallback(&ticket_id, Utc::now()));
        let (progress_tx, _) = watch::channel(100.0);
        let mut display = Self {
            backend,
            settings,
            ticket_id,
            token_tx,
            progress_tx,
            refresh: None,
            countdown: None,
        };
        display.spawn_timers();
        Ok(display)
    }

    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    /// Currently displayed token.
    pub fn current(&self) -> DisplayToken {
        self.token_tx.borrow().clone()
    }

    /// Currently displayed value, ready for the QR renderer.
    pub fn value(&self) -> String {
        self.token_tx.borrow().value.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayToken> {
        self.token_tx.subscribe()
    }

    /// Countdown percentage in `[0, 100]`.
    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.progress_tx.subscribe()
    }

    /// Switch to another ticket. Both timers and any in-flight fetch for the
    /// previous ticket are cancelled before the new ones start.
    pub fn retarget(&mut self, ticket_id: impl Into<String>) {
        let ticket_id = ticket_id.into();
        if ticket_id == self.ticket_id {
            return;
        }
        self.stop();
        info!(from = %self.ticket_id, to = %ticket_id, "retargeting token display");
        self.ticket_id = ticket_id;
        self.token_tx
            .send_replace(DisplayToken::fallback(&self.ticket_id, Utc::now()));
        self.progress_tx.send_replace(100.0);
        self.spawn_timers();
    }

    /// Stop both timers. Late fetch results are discarded with the refresh task.
    pub fn stop(&mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.abort();
        }
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.refresh.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn spawn_timers(&mut self) {
        self.refresh = Some(tokio::spawn(refresh_loop(
            self.backend.clone(),
            self.ticket_id.clone(),
            self.settings.refresh_interval,
            self.token_tx.clone(),
        )));
        self.countdown = Some(tokio::spawn(countdown_loop(
            self.settings.refresh_interval,
            self.settings.progress_tick,
            self.progress_tx.clone(),
        )));
    }
}

impl Drop for RotatingTokenDisplay {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One fetch per tick, each tagged with a sequence number. Fetches may
/// finish out of order; only a result newer than the last adopted one is
/// published. In-flight fetches live in the `JoinSet` and are aborted
/// together with this task.
async fn refresh_loop(
    backend: Arc<dyn TicketBackend>,
    ticket_id: String,
    interval: Duration,
    token_tx: watch::Sender<DisplayToken>,
) {
    let mut fetches = JoinSet::new();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut issued: u64 = 0;
    let mut adopted: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                issued += 1;
                fetches.spawn(fetch_once(backend.clone(), ticket_id.clone(), issued));
            }
            Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                match joined {
                    Ok((seq, token)) if seq > adopted => {
                        adopted = seq;
                        // the watched value names the ticket currently on screen
                        token_tx.send_if_modified(|current| {
                            if current.issued_for_ticket_id != token.issued_for_ticket_id {
                                return false;
                            }
                            *current = token;
                            true
                        });
                    }
                    Ok((seq, _)) => debug!(seq, adopted, "discarding stale display token"),
                    Err(err) => warn!(?err, "token fetch task failed"),
                }
            }
        }
    }
}

async fn fetch_once(
    backend: Arc<dyn TicketBackend>,
    ticket_id: String,
    seq: u64,
) -> (u64, DisplayToken) {
    let token = match backend.issue_display_token(&ticket_id).await {
        Ok(value) if !value.is_empty() => DisplayToken::issued(&ticket_id, value, Utc::now()),
        Ok(_) => {
            debug!(%ticket_id, "empty display token; showing ticket id");
            DisplayToken::fallback(&ticket_id, Utc::now())
        }
        Err(err) => {
            debug!(?err, %ticket_id, "display token refresh failed; showing ticket id");
            DisplayToken::fallback(&ticket_id, Utc::now())
        }
    };
    (seq, token)
}

async fn countdown_loop(interval: Duration, tick: Duration, progress_tx: watch::Sender<f64>) {
    let span = interval.max(MIN_PROGRESS_SPAN);
    let start = Instant::now();
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        progress_tx.send_replace(progress_at(start.elapsed(), span));
    }
}

/// Remaining share of the current refresh cycle, as a percentage.
pub fn progress_at(elapsed: Duration, span: Duration) -> f64 {
    let span_ms = span.as_millis().max(1);
    let into_cycle = elapsed.as_millis() % span_ms;
    100.0 - (into_cycle as f64 / span_ms as f64) * 100.0
}
