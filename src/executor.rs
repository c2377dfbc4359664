//! Policy execution: resolve, open a session, attest every (element, intent)
//! pair, and aggregate the outcomes.
//!
//! Only connecting, listing intents and opening the session can fail a run.
//! Everything after that is folded into the pair it happened to, so a run that
//! gets past the session yields exactly `|elements| × |attestations|` results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::client::{AttestRequest, AttestationService, ClaimRoute, ServiceConnector};
use crate::error::{AttestError, RunError};
use crate::model::{AttestItem, AttestationResult, Claim, IntentIndex, Policy};
use crate::poller::ClaimPoller;
use crate::resolver::IdentifierResolver;
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::verify::{verify_rules, EmptyRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub claim_retry: RetryPolicy,
    /// Claim path polled first
    pub claim_route: ClaimRoute,
    /// Poll the other claim path when the first one runs dry
    pub claim_route_fallback: bool,
    pub empty_rules: EmptyRules,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            claim_retry: RetryPolicy::default(),
            claim_route: ClaimRoute::default(),
            claim_route_fallback: true,
            empty_rules: EmptyRules::default(),
        }
    }
}

/// Pass/fail counts over a run's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_results(results: &[AttestationResult]) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
        }
    }
}

/// Results of one run and the session they were gathered under.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub session_id: String,
    pub results: Vec<AttestationResult>,
}

/// A completed run with its timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRun {
    pub policy: String,
    pub service_url: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<AttestationResult>,
    pub summary: RunSummary,
}

impl PolicyRun {
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

pub struct PolicyExecutor {
    connector: Arc<dyn ServiceConnector>,
    settings: ExecutorSettings,
}

impl PolicyExecutor {
    pub fn new(connector: Arc<dyn ServiceConnector>, settings: ExecutorSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Runs a policy to completion.
    pub async fn execute_policy(&self, policy: &Policy) -> Result<Vec<AttestationResult>, RunError> {
        self.execute_with_cancel(policy, &CancelSignal::never())
            .await
            .map(|execution| execution.results)
    }

    /// Runs a policy, checking `cancel` between pairs.
    ///
    /// A cancelled run returns [`RunError::Cancelled`] and discards the
    /// results gathered so far. The session is closed either way.
    pub async fn execute_with_cancel(
        &self,
        policy: &Policy,
        cancel: &CancelSignal,
    ) -> Result<Execution, RunError> {
        info!(
            policy = %policy.name,
            service = %policy.service_url,
            attestations = policy.attestations.len(),
            "executing policy"
        );

        let service = self.connector.connect(&policy.service_url)?;
        let resolver = IdentifierResolver::new(service.as_ref());
        let intents = resolver
            .build_intent_index()
            .await
            .map_err(RunError::IntentListing)?;
        let elements = resolver.resolve_elements(&policy.collection).await;

        let session = Session::open(Arc::clone(&service)).await?;
        let session_id = session.id().to_string();
        let mut results = Vec::with_capacity(elements.len() * policy.attestations.len());
        let mut cancelled = false;

        'pairs: for element in elements.iter() {
            for item in &policy.attestations {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'pairs;
                }
                let result = self
                    .attest_pair(service.as_ref(), &session_id, &intents, element, item)
                    .await;
                if !result.passed {
                    error!(
                        policy = %policy.name,
                        element,
                        intent = %item.intent_name,
                        error = result.claim.error_message().unwrap_or("rule check failed"),
                        "attestation failed"
                    );
                }
                results.push(result);
            }
        }

        session.close().await;

        if cancelled {
            warn!(policy = %policy.name, completed = results.len(), "policy run cancelled");
            return Err(RunError::Cancelled);
        }

        let summary = RunSummary::from_results(&results);
        info!(
            policy = %policy.name,
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "policy executed"
        );
        Ok(Execution {
            session_id,
            results,
        })
    }

    /// Runs a policy and wraps the results in a timed report.
    pub async fn run_report(&self, policy: &Policy, cancel: &CancelSignal) -> Result<PolicyRun, RunError> {
        let started_at = Utc::now();
        let Execution {
            session_id,
            results,
        } = self.execute_with_cancel(policy, cancel).await?;
        Ok(PolicyRun {
            policy: policy.name.clone(),
            service_url: policy.service_url.clone(),
            session_id,
            started_at,
            finished_at: Utc::now(),
            summary: RunSummary::from_results(&results),
            results,
        })
    }

    async fn attest_pair(
        &self,
        service: &dyn AttestationService,
        session_id: &str,
        intents: &IntentIndex,
        element: &str,
        item: &AttestItem,
    ) -> AttestationResult {
        let Some(intent_id) = intents.get(&item.intent_name) else {
            let err = AttestError::NotFound(format!("intent `{}`", item.intent_name));
            return AttestationResult::failed(element, &item.intent_name, None, err.to_string());
        };

        let request = AttestRequest::new(element, intent_id, &item.endpoint, session_id);
        let claim_id = match service.attest(&request).await {
            Ok(id) => id,
            Err(e) => {
                return AttestationResult::failed(element, &item.intent_name, None, e.to_string());
            }
        };
        debug!(element, intent = %item.intent_name, claim_id = %claim_id, "attestation accepted");

        let poller = ClaimPoller::new(service, self.settings.claim_retry, self.settings.claim_route)
            .with_fallback(self.settings.claim_route_fallback);
        let document = match poller.fetch(&claim_id).await {
            Ok(document) => document,
            Err(e) => {
                return AttestationResult::failed(
                    element,
                    &item.intent_name,
                    Some(claim_id),
                    e.to_string(),
                );
            }
        };

        let claim = Claim::from_document(document);
        if claim.is_error() {
            return AttestationResult {
                element_id: element.to_string(),
                intent_name: item.intent_name.clone(),
                claim,
                claim_id: Some(claim_id),
                passed: false,
                rule_results: Vec::new(),
            };
        }

        let verdict = verify_rules(
            service,
            &claim_id,
            session_id,
            &item.rules,
            self.settings.empty_rules,
        )
        .await;

        AttestationResult {
            element_id: element.to_string(),
            intent_name: item.intent_name.clone(),
            claim,
            claim_id: Some(claim_id),
            passed: verdict.passed,
            rule_results: verdict.results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::RunCancellation;
    use crate::client::{ClaimRoute, IntentEntry, Verdict, VerifyRequest};
    use crate::error::Result;
    use crate::model::{Collection, Rule};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Service with one intent `sysinfo -> p1`. Claims for element `bad`
    /// carry an error marker; every rule passes.
    #[derive(Default)]
    struct Bench {
        attests: Mutex<Vec<AttestRequest>>,
        closes: AtomicU32,
        cancel_after_attests: Option<(usize, RunCancellation)>,
    }

    #[async_trait]
    impl AttestationService for Bench {
        fn base_url(&self) -> &str {
            "mock://bench"
        }

        async fn list_intents(&self) -> Result<Vec<IntentEntry>> {
            Ok(vec![IntentEntry::Item {
                itemid: "p1".into(),
                name: "sys info".into(),
            }])
        }

        async fn intent_ids_by_name(&self, _name: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn intent_exists(&self, _intent_id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn element_ids_by_name(&self, _name: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn open_session(&self) -> Result<String> {
            Ok("s1".into())
        }

        async fn close_session(&self, _session_id: &str) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn attest(&self, request: &AttestRequest) -> Result<String> {
            let mut attests = self.attests.lock().unwrap();
            attests.push(request.clone());
            if let Some((after, cancel)) = &self.cancel_after_attests {
                if attests.len() >= *after {
                    cancel.cancel();
                }
            }
            Ok(format!("claim-{}", request.eid))
        }

        async fn get_claim(&self, _route: ClaimRoute, claim_id: &str) -> Result<Map<String, Value>> {
            let doc = if claim_id == "claim-bad" {
                json!({ "error": "element offline" })
            } else {
                json!({ "id": claim_id })
            };
            Ok(doc.as_object().cloned().unwrap_or_default())
        }

        async fn verify(&self, request: &VerifyRequest) -> Result<Verdict> {
            Ok(Verdict {
                result_id: format!("res-{}", request.rule),
                passed: true,
            })
        }
    }

    struct Fixed(Arc<Bench>);

    impl ServiceConnector for Fixed {
        fn connect(&self, _base_url: &str) -> std::result::Result<Arc<dyn AttestationService>, RunError> {
            let service: Arc<dyn AttestationService> = self.0.clone();
            Ok(service)
        }
    }

    fn executor(bench: &Arc<Bench>, empty_rules: EmptyRules) -> PolicyExecutor {
        PolicyExecutor::new(
            Arc::new(Fixed(bench.clone())),
            ExecutorSettings {
                claim_retry: RetryPolicy::new(Duration::from_millis(1), 3),
                empty_rules,
                ..Default::default()
            },
        )
    }

    fn policy(items: &[&str], attestations: Vec<AttestItem>) -> Policy {
        Policy {
            name: "bench".into(),
            description: String::new(),
            service_url: "mock://bench".into(),
            collection: Collection {
                items: items.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            attestations,
        }
    }

    fn item(intent: &str, rules: &[&str]) -> AttestItem {
        AttestItem {
            intent_name: intent.into(),
            endpoint: "tpm0".into(),
            rules: rules.iter().map(|r| Rule::named(*r)).collect(),
        }
    }

    #[tokio::test]
    async fn error_claim_fails_pair_without_verifying() {
        let bench = Arc::new(Bench::default());
        let results = executor(&bench, EmptyRules::Pass)
            .execute_policy(&policy(&["bad", "good"], vec![item("sysinfo", &["r1"])]))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].element_id, "bad");
        assert!(!results[0].passed);
        assert_eq!(results[0].claim.error_message(), Some("element offline"));
        assert!(results[0].rule_results.is_empty());
        assert_eq!(results[0].claim_id.as_deref(), Some("claim-bad"));

        assert!(results[1].passed);
        assert_eq!(results[1].rule_results.len(), 1);
    }

    #[tokio::test]
    async fn attest_request_carries_session_and_endpoint() {
        let bench = Arc::new(Bench::default());
        executor(&bench, EmptyRules::Pass)
            .execute_policy(&policy(&["e1"], vec![item("sys info", &[])]))
            .await
            .unwrap();

        let attests = bench.attests.lock().unwrap();
        assert_eq!(attests.len(), 1);
        assert_eq!(attests[0].eid, "e1");
        assert_eq!(attests[0].pid, "p1");
        assert_eq!(attests[0].epn, "tpm0");
        assert_eq!(attests[0].sid, "s1");
    }

    #[tokio::test]
    async fn empty_rules_setting_decides_rule_less_pairs() {
        let bench = Arc::new(Bench::default());
        let doc = policy(&["e1"], vec![item("sysinfo", &[])]);

        let lenient = executor(&bench, EmptyRules::Pass).execute_policy(&doc).await.unwrap();
        assert!(lenient[0].passed);

        let strict = executor(&bench, EmptyRules::Fail).execute_policy(&doc).await.unwrap();
        assert!(!strict[0].passed);
    }

    #[tokio::test]
    async fn no_elements_means_no_results_but_session_still_closes() {
        let bench = Arc::new(Bench::default());
        let results = executor(&bench, EmptyRules::Pass)
            .execute_policy(&policy(&[], vec![item("sysinfo", &["r1"])]))
            .await
            .unwrap();

        assert!(results.is_empty());
        assert_eq!(bench.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_between_pairs_and_closes_session() {
        let (cancel, signal) = RunCancellation::new();
        let bench = Arc::new(Bench {
            cancel_after_attests: Some((1, cancel)),
            ..Default::default()
        });

        let err = executor(&bench, EmptyRules::Pass)
            .execute_with_cancel(
                &policy(&["e1", "e2", "e3"], vec![item("sysinfo", &["r1"])]),
                &signal,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(bench.attests.lock().unwrap().len(), 1);
        assert_eq!(bench.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn report_summarizes_results() {
        let bench = Arc::new(Bench::default());
        let run = executor(&bench, EmptyRules::Pass)
            .run_report(
                &policy(&["bad", "e1", "e2"], vec![item("sysinfo", &["r1"])]),
                &CancelSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(run.policy, "bench");
        assert_eq!(run.session_id, "s1");
        assert_eq!(
            run.summary,
            RunSummary {
                total: 3,
                passed: 2,
                failed: 1
            }
        );
        assert!(!run.all_passed());
        assert!(run.finished_at >= run.started_at);
    }
}
