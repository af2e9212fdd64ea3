use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a confirmed scan.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckAction {
    #[default]
    In,
    Out,
}

impl CheckAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckAction::In => "in",
            CheckAction::Out => "out",
        }
    }

    /// Human label used in status and error lines ("Check-in" / "Check-out").
    pub fn label(&self) -> &'static str {
        match self {
            CheckAction::In => "Check-in",
            CheckAction::Out => "Check-out",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            CheckAction::In => "Checked in",
            CheckAction::Out => "Checked out",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            CheckAction::In => CheckAction::Out,
            CheckAction::Out => CheckAction::In,
        }
    }
}

impl fmt::Display for CheckAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(CheckAction::In),
            "out" => Ok(CheckAction::Out),
            other => Err(format!("unknown check action '{}', expected 'in' or 'out'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenSource {
    /// Value was issued by the backend for this refresh cycle.
    Issued,
    /// Backend was unreachable or refused; the raw ticket id is shown.
    Fallback,
}

/// The value currently rendered into the holder's QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayToken {
    pub value: String,
    pub issued_for_ticket_id: String,
    pub fetched_at: DateTime<Utc>,
    pub source: TokenSource,
}

impl DisplayToken {
    pub fn issued(ticket_id: &str, value: String, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            issued_for_ticket_id: ticket_id.to_string(),
            fetched_at,
            source: TokenSource::Issued,
        }
    }

    pub fn fallback(ticket_id: &str, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value: ticket_id.to_string(),
            issued_for_ticket_id: ticket_id.to_string(),
            fetched_at,
            source: TokenSource::Fallback,
        }
    }
}

/// A detected code waiting for staff confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub raw_value: String,
    pub detected_at: DateTime<Utc>,
}

/// Outcome of the most recent completed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHistoryEntry {
    pub ticket_reference: String,
    pub action: CheckAction,
    pub completed_at: DateTime<Utc>,
}

const REFERENCE_PREFIX_CHARS: usize = 8;

/// Short form of a raw token for display when the server names no ticket.
pub fn truncate_reference(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(REFERENCE_PREFIX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// Body of `POST /client/scan`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub token: String,
    pub event_id: String,
    pub action: CheckAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketSummary {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub checkin_count: Option<i64>,
}

/// Successful reply of `POST /client/scan`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub ticket: Option<TicketSummary>,
}

impl ScanResponse {
    /// Server-named ticket, falling back to a truncated form of the scanned token.
    pub fn ticket_reference(&self, raw_token: &str) -> String {
        self.ticket_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| {
                self.ticket
                    .as_ref()
                    .map(|t| t.id.as_str())
                    .filter(|id| !id.is_empty())
            })
            .map(str::to_string)
            .unwrap_or_else(|| truncate_reference(raw_token))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(default)]
    pub scanned_count: u64,
}

/// Event a held ticket admits to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketEvent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
}

/// One ticket owned by the signed-in holder, as listed by `GET /tickets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeldTicket {
    pub id: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub checkin_count: i64,
    #[serde(default)]
    pub event: Option<TicketEvent>,
}

impl HeldTicket {
    /// One-line listing: id, event title and location when known, status.
    pub fn summary(&self) -> String {
        let mut line = self.id.clone();
        if let Some(event) = &self.event {
            line.push_str(&format!("  {}", event.title));
            if !event.location.is_empty() {
                line.push_str(&format!(" @ {}", event.location));
            }
        }
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(&format!("  [{}]", status));
        }
        line
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketList {
    #[serde(default)]
    pub tickets: Vec<HeldTicket>,
}
