use chrono::{DateTime, Utc};

use crate::model::{CheckAction, ScanCandidate, ScanHistoryEntry, ScanResponse};

/// Where the door scanner is in its scan → confirm → commit cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    PendingConfirmation(ScanCandidate),
    Submitting {
        candidate: ScanCandidate,
        action: CheckAction,
    },
    Error(String),
}

impl ScanPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::PendingConfirmation(_) => "pending_confirmation",
            ScanPhase::Submitting { .. } => "submitting",
            ScanPhase::Error(_) => "error",
        }
    }

    /// A new detection may become the candidate.
    pub fn accepts_detection(&self) -> bool {
        matches!(self, ScanPhase::Idle | ScanPhase::Error(_))
    }

    pub fn candidate(&self) -> Option<&ScanCandidate> {
        match self {
            ScanPhase::PendingConfirmation(c) | ScanPhase::Submitting { candidate: c, .. } => {
                Some(c)
            }
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ScanPhase::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

/// A confirmed scan ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub token: String,
    pub action: CheckAction,
}

/// Scan-confirm state machine. Pure: no I/O, no clocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMachine {
    phase: ScanPhase,
    action: CheckAction,
    last_scan: Option<ScanHistoryEntry>,
}

impl ScanMachine {
    pub fn new(action: CheckAction) -> Self {
        Self {
            phase: ScanPhase::Idle,
            action,
            last_scan: None,
        }
    }

    pub fn phase(&self) -> &ScanPhase {
        &self.phase
    }

    pub fn action(&self) -> CheckAction {
        self.action
    }

    pub fn last_scan(&self) -> Option<&ScanHistoryEntry> {
        self.last_scan.as_ref()
    }

    /// Offer a detector reading. Returns `true` when it became the candidate.
    /// Empty readings and readings while a candidate or request exists are dropped.
    pub fn on_detection(&mut self, raw: Option<&str>, now: DateTime<Utc>) -> bool {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return false;
        };
        if !self.phase.accepts_detection() {
            return false;
        }
        self.phase = ScanPhase::PendingConfirmation(ScanCandidate {
            raw_value: raw.to_string(),
            detected_at: now,
        });
        true
    }

    /// Staff confirmed the pending candidate.
    pub fn confirm(&mut self) -> Option<Submission> {
        let ScanPhase::PendingConfirmation(candidate) = &self.phase else {
            return None;
        };
        let candidate = candidate.clone();
        let submission = Submission {
            token: candidate.raw_value.clone(),
            action: self.action,
        };
        self.phase = ScanPhase::Submitting {
            candidate,
            action: self.action,
        };
        Some(submission)
    }

    /// "Scan next": drop the pending candidate without any request.
    pub fn dismiss(&mut self) -> bool {
        if !matches!(self.phase, ScanPhase::PendingConfirmation(_)) {
            return false;
        }
        self.phase = ScanPhase::Idle;
        true
    }

    /// Applies to the next confirmation only; never changes the phase.
    pub fn set_action(&mut self, action: CheckAction) {
        self.action = action;
    }

    /// The in-flight request finished. `Err` carries the failure reason.
    pub fn on_submit_result(
        &mut self,
        result: Result<ScanResponse, String>,
        now: DateTime<Utc>,
    ) -> bool {
        let ScanPhase::Submitting { candidate, action } = &self.phase else {
            return false;
        };
        let action = *action;
        match result {
            Ok(response) => {
                self.last_scan = Some(ScanHistoryEntry {
                    ticket_reference: response.ticket_reference(&candidate.raw_value),
                    action,
                    completed_at: now,
                });
                self.phase = ScanPhase::Idle;
            }
            Err(reason) => {
                self.phase = ScanPhase::Error(format!("{} failed: {}", action.label(), reason));
            }
        }
        true
    }

    /// Operator cleared an error.
    pub fn retry(&mut self) -> bool {
        if !matches!(self.phase, ScanPhase::Error(_)) {
            return false;
        }
        self.phase = ScanPhase::Idle;
        true
    }

    /// Surface a failure outside the submit cycle (camera, capability).
    /// A pending candidate is discarded; an in-flight request is left alone.
    pub fn fail(&mut self, message: impl Into<String>) {
        if matches!(self.phase, ScanPhase::Submitting { .. }) {
            return;
        }
        self.phase = ScanPhase::Error(message.into());
    }

    /// One-line status for the operator.
    pub fn status_line(&self) -> String {
        match &self.phase {
            ScanPhase::Idle => match &self.last_scan {
                Some(entry) => format!("{} {}.", entry.action.past_tense(), entry.ticket_reference),
                None => "Ready to scan.".to_string(),
            },
            ScanPhase::PendingConfirmation(_) => {
                format!("Code detected. Confirm {}.", self.action.label().to_lowercase())
            }
            ScanPhase::Submitting { .. } => "Verifying QR...".to_string(),
            ScanPhase::Error(msg) => msg.clone(),
        }
    }
}

impl Default for ScanMachine {
    fn default() -> Self {
        Self::new(CheckAction::In)
    }
}
