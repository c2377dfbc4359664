//! Orchestrator configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::{ClaimRoute, ClientSettings};
use crate::executor::ExecutorSettings;
use crate::retry::RetryPolicy;
use crate::verify::EmptyRules;

/// Runtime settings, loadable from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Per-request timeout against the attestation service
    pub request_timeout_secs: u64,
    /// Wait between claim reads
    pub claim_poll_interval_ms: u64,
    /// Claim reads before giving up
    pub claim_poll_max_attempts: u32,
    /// Claim path polled first
    pub claim_route: ClaimRoute,
    /// Poll the other claim path when the first one runs dry
    pub claim_route_fallback: bool,
    /// Verdict for attestations that declare no rules
    pub empty_rules: EmptyRules,
    /// Directory of JSON policy documents
    pub policies_dir: PathBuf,
    /// Bind address for `serve`
    pub listen_addr: SocketAddr,
    pub user_agent: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let client = ClientSettings::default();
        let executor = ExecutorSettings::default();
        Self {
            request_timeout_secs: client.request_timeout.as_secs(),
            claim_poll_interval_ms: executor.claim_retry.interval.as_millis() as u64,
            claim_poll_max_attempts: executor.claim_retry.max_attempts,
            claim_route: executor.claim_route,
            claim_route_fallback: executor.claim_route_fallback,
            empty_rules: executor.empty_rules,
            policies_dir: PathBuf::from("policies"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            user_agent: client.user_agent,
        }
    }
}

impl OrchestratorConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let config: OrchestratorConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            policies_dir = %config.policies_dir.display(),
            claim_poll_max_attempts = config.claim_poll_max_attempts,
            request_timeout_secs = config.request_timeout_secs,
            "loaded orchestrator config"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.claim_poll_max_attempts == 0 {
            bail!("claim_poll_max_attempts must be greater than zero");
        }
        if self.policies_dir.as_os_str().is_empty() {
            bail!("policies_dir must not be empty");
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn claim_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.claim_poll_interval_ms),
            self.claim_poll_max_attempts,
        )
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            claim_retry: self.claim_retry(),
            claim_route: self.claim_route,
            claim_route_fallback: self.claim_route_fallback,
            empty_rules: self.empty_rules,
        }
    }
}
