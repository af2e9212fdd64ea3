use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::model::{AccountSummary, HeldTicket, ScanRequest, ScanResponse, TicketList};

const GENERIC_FAILURE: &str = "Request failed.";

/// Backend calls the door client depends on.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Exchange a ticket id for a short-lived display token.
    async fn issue_display_token(&self, ticket_id: &str) -> Result<String>;

    /// Commit a confirmed check-in or check-out.
    async fn confirm_scan(&self, request: &ScanRequest) -> Result<ScanResponse>;
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = cfg.backend.url()?;
        Self::with_base_url(base_url, cfg.backend.timeout())
    }

    pub fn with_base_url(base_url: Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("doorpass/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn build_token_request(&self, ticket_id: &str) -> Result<reqwest::Request> {
        let mut endpoint = self.base_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("backend base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["tickets", ticket_id, "qr-token"]);
        self.http
            .post(endpoint)
            .json(&json!({}))
            .build()
            .context("failed to build token request")
    }

    pub fn build_scan_request(&self, request: &ScanRequest) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("client/scan")
            .context("invalid backend base URL")?;
        self.http
            .post(endpoint)
            .json(request)
            .build()
            .context("failed to build scan request")
    }

    pub fn build_account_request(&self) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("client/account")
            .context("invalid backend base URL")?;
        self.http
            .get(endpoint)
            .build()
            .context("failed to build account request")
    }

    pub fn build_tickets_request(&self) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("tickets")
            .context("invalid backend base URL")?;
        self.http
            .get(endpoint)
            .build()
            .context("failed to build tickets request")
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        debug!(method=%request.method(), url=%request.url(), "sending backend request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach backend")?;
        parse_response(res).await
    }

    #[instrument(skip_all)]
    pub async fn issue_display_token(&self, ticket_id: &str) -> Result<String> {
        let request = self.build_token_request(ticket_id)?;
        let payload: TokenResponse = self.execute(request).await?;
        match payload.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(anyhow!("backend returned no display token")),
        }
    }

    #[instrument(skip_all, fields(event_id = %request.event_id, action = %request.action))]
    pub async fn confirm_scan(&self, request: &ScanRequest) -> Result<ScanResponse> {
        let http_request = self.build_scan_request(request)?;
        self.execute(http_request).await
    }

    /// Tickets held by the signed-in account.
    #[instrument(skip_all)]
    pub async fn list_tickets(&self) -> Result<Vec<HeldTicket>> {
        let request = self.build_tickets_request()?;
        let list: TicketList = self.execute(request).await?;
        debug!(count = list.tickets.len(), "listed held tickets");
        Ok(list.tickets)
    }

    #[instrument(skip_all)]
    pub async fn account_summary(&self) -> Result<AccountSummary> {
        let request = self.build_account_request()?;
        self.execute(request).await
    }
}

#[async_trait]
impl TicketBackend for BackendClient {
    async fn issue_display_token(&self, ticket_id: &str) -> Result<String> {
        BackendClient::issue_display_token(self, ticket_id).await
    }

    async fn confirm_scan(&self, request: &ScanRequest) -> Result<ScanResponse> {
        BackendClient::confirm_scan(self, request).await
    }
}

/// Decode a backend reply. A body that is not JSON reads as `{}`; non-2xx
/// statuses become errors carrying the server's own message.
async fn parse_response<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({}));
    if !status.is_success() {
        let message = error_message(&body);
        warn!(%status, reason = %message, "backend rejected request");
        return Err(anyhow!("{}", message));
    }
    serde_json::from_value(body).context("unexpected backend response shape")
}

/// The `error` field, else `message`, else a generic line.
pub fn error_message(body: &Value) -> String {
    ["error", "message"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .filter(|msg| !msg.is_empty())
        .unwrap_or(GENERIC_FAILURE)
        .to_string()
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}
