//! Typed client for the remote attestation service.
//!
//! [`AttestationService`] is the seam the orchestrator talks to;
//! [`HttpAttestationService`] implements it over JSON/HTTP with `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AttestError, Result, RunError};

// ── Wire types ──────────────────────────────────────────────────────────

/// One entry of `GET /intents`. Older services list bare names, newer ones
/// list `{itemid, name}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntentEntry {
    Name(String),
    Item { itemid: String, name: String },
}

impl IntentEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name.as_str(),
            Self::Item { name, .. } => name.as_str(),
        }
    }

    /// Identifier already supplied by the listing, if any.
    pub fn listed_id(&self) -> Option<&str> {
        match self {
            Self::Name(_) => None,
            Self::Item { itemid, .. } if !itemid.trim().is_empty() => Some(itemid.as_str()),
            Self::Item { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntentListing {
    #[serde(default)]
    intents: Vec<IntentEntry>,
}

#[derive(Debug, Deserialize)]
struct IntentLookup {
    #[serde(default)]
    intents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ElementLookup {
    #[serde(default)]
    elements: Vec<String>,
    #[serde(default)]
    length: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    itemid: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    itemid: String,
    /// Absent means the rule passed
    #[serde(default)]
    result: Option<VerdictCode>,
    #[serde(default)]
    error: Option<String>,
}

/// The verify `result` field as the service versions encode it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VerdictCode {
    Flag(bool),
    Code(i64),
    Token(String),
}

impl VerdictCode {
    /// `0`, `true` and the tokens `0`/`pass`/`passed`/`ok`/`true` count as a pass.
    pub fn passed(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Code(code) => *code == 0,
            Self::Token(token) => matches!(
                token.trim().to_ascii_lowercase().as_str(),
                "0" | "pass" | "passed" | "ok" | "true"
            ),
        }
    }
}

/// Body of `POST /attest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttestRequest {
    pub eid: String,
    pub pid: String,
    pub epn: String,
    pub sid: String,
    pub parameters: Map<String, Value>,
}

impl AttestRequest {
    pub fn new(element_id: &str, intent_id: &str, endpoint: &str, session_id: &str) -> Self {
        Self {
            eid: element_id.to_string(),
            pid: intent_id.to_string(),
            epn: endpoint.to_string(),
            sid: session_id.to_string(),
            parameters: Map::new(),
        }
    }
}

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyRequest {
    pub cid: String,
    pub rule: String,
    pub sid: String,
    pub parameters: Map<String, Value>,
}

impl VerifyRequest {
    pub fn new(claim_id: &str, rule_name: &str, session_id: &str) -> Self {
        Self {
            cid: claim_id.to_string(),
            rule: rule_name.to_string(),
            sid: session_id.to_string(),
            parameters: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub result_id: String,
    pub passed: bool,
}

/// Path shape under which the service exposes claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimRoute {
    #[default]
    Claim,
    Claims,
}

impl ClaimRoute {
    fn segment(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Claims => "claims",
        }
    }

    /// The route to fall back to when this one never yields the claim.
    pub fn other(self) -> Self {
        match self {
            Self::Claim => Self::Claims,
            Self::Claims => Self::Claim,
        }
    }
}

// ── Service seam ────────────────────────────────────────────────────────

#[async_trait]
pub trait AttestationService: Send + Sync {
    fn base_url(&self) -> &str;

    /// `GET /intents`
    async fn list_intents(&self) -> Result<Vec<IntentEntry>>;

    /// `GET /intents/name/{name}`; an unknown name yields an empty list.
    async fn intent_ids_by_name(&self, name: &str) -> Result<Vec<String>>;

    /// `GET /intent/{id}`: does an intent with this identifier exist?
    async fn intent_exists(&self, intent_id: &str) -> Result<bool>;

    /// `GET /elements/name/{name}`
    async fn element_ids_by_name(&self, name: &str) -> Result<Vec<String>>;

    /// `POST /session`
    async fn open_session(&self) -> Result<String>;

    /// `DELETE /session/{id}`
    async fn close_session(&self, session_id: &str) -> Result<()>;

    /// `POST /attest`, returning the claim identifier.
    async fn attest(&self, request: &AttestRequest) -> Result<String>;

    /// `GET /claim/{id}` or `GET /claims/{id}`; a claim that does not exist
    /// yet is `NotFound`.
    async fn get_claim(&self, route: ClaimRoute, claim_id: &str) -> Result<Map<String, Value>>;

    /// `POST /verify`
    async fn verify(&self, request: &VerifyRequest) -> Result<Verdict>;
}

/// Builds a service handle for the base URL a policy names.
pub trait ServiceConnector: Send + Sync {
    fn connect(&self, base_url: &str) -> std::result::Result<Arc<dyn AttestationService>, RunError>;
}

// ── HTTP implementation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("policy-attest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpAttestationService {
    base: Url,
    base_label: String,
    client: Client,
}

impl HttpAttestationService {
    pub fn new(base_url: &str, settings: &ClientSettings) -> std::result::Result<Self, RunError> {
        let connect_err = |message: String| RunError::Connect {
            url: base_url.to_string(),
            message,
        };

        let base = Url::parse(base_url.trim()).map_err(|e| connect_err(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(connect_err("URL cannot carry a path".into()));
        }

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| connect_err(e.to_string()))?;

        Ok(Self {
            base_label: base.as_str().trim_end_matches('/').to_string(),
            base,
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AttestError::transport(self.base_label.as_str(), "URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request
            .send()
            .await
            .map_err(|e| AttestError::transport(url.as_str(), e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AttestError::transport(url.as_str(), e))?;
        debug!(url = %url, status = status.as_u16(), body = %body, "attestation service response");
        Ok((status, body))
    }

    /// Decodes `{itemid, error?}`. The error field wins over the status code,
    /// an undecodable non-2xx body is reported by status.
    fn item_id(url: &Url, status: StatusCode, body: &str, what: &str) -> Result<String> {
        let item: ItemResponse = match serde_json::from_str(body) {
            Ok(item) => item,
            Err(_) if !status.is_success() => return Err(unexpected_status(status, body)),
            Err(e) => return Err(AttestError::decode(url.as_str(), e)),
        };
        if let Some(error) = item.error.filter(|e| !e.trim().is_empty()) {
            return Err(AttestError::Service(error));
        }
        if !status.is_success() {
            return Err(unexpected_status(status, body));
        }
        if item.itemid.trim().is_empty() {
            return Err(AttestError::service(format!("{what} response carried no itemid")));
        }
        Ok(item.itemid)
    }
}

fn unexpected_status(status: StatusCode, body: &str) -> AttestError {
    AttestError::Service(format!("status {}: {}", status.as_u16(), body.trim()))
}

fn decode<T: DeserializeOwned>(url: &Url, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| AttestError::decode(url.as_str(), e))
}

#[async_trait]
impl AttestationService for HttpAttestationService {
    fn base_url(&self) -> &str {
        &self.base_label
    }

    async fn list_intents(&self) -> Result<Vec<IntentEntry>> {
        let url = self.url(&["intents"])?;
        let (status, body) = self.send(&url, self.client.get(url.clone())).await?;
        if !status.is_success() {
            return Err(unexpected_status(status, &body));
        }
        let listing: IntentListing = decode(&url, &body)?;
        Ok(listing.intents)
    }

    async fn intent_ids_by_name(&self, name: &str) -> Result<Vec<String>> {
        let url = self.url(&["intents", "name", name])?;
        let (status, body) = self.send(&url, self.client.get(url.clone())).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => {
                let lookup: IntentLookup = decode(&url, &body)?;
                Ok(lookup.intents)
            }
            s => Err(unexpected_status(s, &body)),
        }
    }

    async fn intent_exists(&self, intent_id: &str) -> Result<bool> {
        let url = self.url(&["intent", intent_id])?;
        let (status, body) = self.send(&url, self.client.get(url.clone())).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(unexpected_status(s, &body)),
        }
    }

    async fn element_ids_by_name(&self, name: &str) -> Result<Vec<String>> {
        let url = self.url(&["elements", "name", name])?;
        let (status, body) = self.send(&url, self.client.get(url.clone())).await?;
        match status {
            StatusCode::NOT_FOUND => Err(AttestError::NotFound(format!("element name `{name}`"))),
            s if s.is_success() => {
                let lookup: ElementLookup = decode(&url, &body)?;
                debug!(
                    name,
                    reported = lookup.length.unwrap_or(lookup.elements.len()),
                    "resolved element name"
                );
                Ok(lookup.elements)
            }
            s => Err(unexpected_status(s, &body)),
        }
    }

    async fn open_session(&self) -> Result<String> {
        let url = self.url(&["session"])?;
        let request = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        let (status, body) = self.send(&url, request).await?;
        Self::item_id(&url, status, &body, "session")
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        let url = self.url(&["session", session_id])?;
        let (status, body) = self.send(&url, self.client.delete(url.clone())).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(unexpected_status(status, &body))
        }
    }

    async fn attest(&self, request: &AttestRequest) -> Result<String> {
        let url = self.url(&["attest"])?;
        debug!(url = %url, element = %request.eid, intent = %request.pid, "sending attestation request");
        let (status, body) = self
            .send(&url, self.client.post(url.clone()).json(request))
            .await?;
        Self::item_id(&url, status, &body, "attest")
    }

    async fn get_claim(&self, route: ClaimRoute, claim_id: &str) -> Result<Map<String, Value>> {
        let url = self.url(&[route.segment(), claim_id])?;
        let (status, body) = self.send(&url, self.client.get(url.clone())).await?;
        match status {
            StatusCode::OK => decode(&url, &body),
            StatusCode::NOT_FOUND => Err(AttestError::NotFound(format!("claim `{claim_id}`"))),
            s => Err(unexpected_status(s, &body)),
        }
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<Verdict> {
        let url = self.url(&["verify"])?;
        debug!(url = %url, claim_id = %request.cid, rule = %request.rule, "sending verify request");
        let (status, body) = self
            .send(&url, self.client.post(url.clone()).json(request))
            .await?;
        let response: VerifyResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(_) if !status.is_success() => return Err(unexpected_status(status, &body)),
            Err(e) => return Err(AttestError::decode(url.as_str(), e)),
        };
        if let Some(error) = response.error.filter(|e| !e.trim().is_empty()) {
            return Err(AttestError::Service(format!("verification error: {error}")));
        }
        if !status.is_success() {
            return Err(unexpected_status(status, &body));
        }
        Ok(Verdict {
            result_id: response.itemid,
            passed: response.result.map_or(true, |code| code.passed()),
        })
    }
}

/// Connects to services over HTTP with shared client settings.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    settings: ClientSettings,
}

impl HttpConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl ServiceConnector for HttpConnector {
    fn connect(&self, base_url: &str) -> std::result::Result<Arc<dyn AttestationService>, RunError> {
        Ok(Arc::new(HttpAttestationService::new(base_url, &self.settings)?))
    }
}
