//! Error types for the attestation orchestrator

use thiserror::Error;

/// Result type for calls against the attestation service
pub type Result<T> = std::result::Result<T, AttestError>;

/// Failure of a single call against the attestation service.
///
/// Every variant carries its message as text so that a failed pair can store
/// it in place of the claim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttestError {
    /// Network failure or per-request timeout
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Response body was not the JSON shape we expected
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Intent, element or claim absent on the service
    #[error("{0} not found")]
    NotFound(String),

    /// Service answered but echoed an error field or an unexpected status
    #[error("attestation service error: {0}")]
    Service(String),

    /// Claim polling ran out of attempts without the claim showing up
    #[error("claim {claim_id} did not materialize after {attempts} attempts")]
    TimeoutExhausted { claim_id: String, attempts: u32 },
}

impl AttestError {
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExhausted { .. })
    }
}

/// Fatal errors that abort a whole policy run.
///
/// A caller sees either one of these or a complete result list, never both.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to connect to attestation service at {url}: {message}")]
    Connect { url: String, message: String },

    #[error("failed to list intents: {0}")]
    IntentListing(#[source] AttestError),

    #[error("failed to open attestation session: {0}")]
    SessionOpen(#[source] AttestError),

    #[error("policy run cancelled")]
    Cancelled,
}

/// Errors raised by a policy store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy `{0}` not found")]
    NotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy document {path}: {message}")]
    Parse { path: String, message: String },
}
