//! Claim polling.
//!
//! The service materializes a claim asynchronously after `POST /attest`
//! returns, so the first reads usually 404. The poller retries not-found reads
//! on a fixed interval and gives up on anything else straight away. Services
//! differ in whether claims live under `/claim` or `/claims`; when the first
//! route never yields the claim the poller can try the other one.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::{AttestationService, ClaimRoute};
use crate::error::AttestError;
use crate::retry::{RetryError, RetryPolicy};

pub struct ClaimPoller<'a> {
    service: &'a dyn AttestationService,
    policy: RetryPolicy,
    routes: Vec<ClaimRoute>,
}

impl<'a> ClaimPoller<'a> {
    /// Polls `route` only.
    pub fn new(service: &'a dyn AttestationService, policy: RetryPolicy, route: ClaimRoute) -> Self {
        Self {
            service,
            policy,
            routes: vec![route],
        }
    }

    /// Also polls the other route, with the same policy, if `route` runs dry.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.routes.truncate(1);
        if fallback {
            let other = self.routes[0].other();
            self.routes.push(other);
        }
        self
    }

    /// Fetches a claim, retrying while the service reports it as not found.
    ///
    /// Running out of attempts on every route yields
    /// [`AttestError::TimeoutExhausted`] with the attempts summed; any other
    /// failure is returned as soon as it happens.
    pub async fn fetch(&self, claim_id: &str) -> Result<Map<String, Value>, AttestError> {
        let mut attempts = 0;
        for &route in &self.routes {
            let outcome = self
                .policy
                .run(
                    |attempt| async move {
                        let result = self.service.get_claim(route, claim_id).await;
                        debug!(claim_id, ?route, attempt, found = result.is_ok(), "polled claim");
                        result
                    },
                    AttestError::is_not_found,
                )
                .await;

            match outcome {
                Ok(claim) => return Ok(claim),
                Err(RetryError::Exhausted { attempts: made, .. }) => {
                    debug!(claim_id, ?route, attempts = made, "claim route exhausted");
                    attempts += made;
                }
                Err(RetryError::Aborted { attempt, error }) => {
                    warn!(claim_id, ?route, attempt, error = %error, "claim retrieval failed");
                    return Err(error);
                }
            }
        }

        warn!(claim_id, attempts, "claim never materialized");
        Err(AttestError::TimeoutExhausted {
            claim_id: claim_id.to_string(),
            attempts,
        })
    }
}
