#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use policy_attest::client::{AttestRequest, ClaimRoute, IntentEntry, Verdict, VerifyRequest};
use policy_attest::error::Result;
use policy_attest::{
    AttestError, AttestItem, AttestationService, Collection, ExecutorSettings, PolicyExecutor,
    Policy, RetryPolicy, Rule, RunError, ServiceConnector,
};

/// How the fake answers reads of a claim.
#[derive(Debug, Clone)]
pub enum ClaimScript {
    /// 404 for the first `n` reads, then the document
    ReadyAfter(u32),
    /// 404 forever
    Never,
    /// Non-404 failure on the first read
    Broken(String),
    /// 200 with an error marker in the document
    Errored(String),
}

/// In-memory attestation service that records every call.
#[derive(Default)]
pub struct FakeService {
    pub intents: Vec<IntentEntry>,
    pub intents_by_name: HashMap<String, Vec<String>>,
    pub elements_by_name: HashMap<String, Vec<String>>,
    /// Claim behaviour keyed by element id; unlisted elements are ready at once
    pub claims: HashMap<String, ClaimScript>,
    /// Verdicts keyed by rule name; unlisted rules pass
    pub verdicts: HashMap<String, bool>,
    pub list_fails: bool,
    pub open_fails: bool,
    pub attest_fails_for: Vec<String>,

    pub opens: AtomicU32,
    pub closes: AtomicU32,
    pub attests: Mutex<Vec<AttestRequest>>,
    pub verifies: Mutex<Vec<VerifyRequest>>,
    pub claim_reads: Mutex<HashMap<String, u32>>,
}

impl FakeService {
    /// Knows intent `sys info` as `p1` and element name `host-1` as `e1`, `e2`.
    pub fn standard() -> Self {
        Self {
            intents: vec![IntentEntry::Name("sys info".into())],
            intents_by_name: HashMap::from([("sysinfo".to_string(), vec!["p1".to_string()])]),
            elements_by_name: HashMap::from([(
                "host-1".to_string(),
                vec!["e1".to_string(), "e2".to_string()],
            )]),
            ..Default::default()
        }
    }

    pub fn with_claim(mut self, element: &str, script: ClaimScript) -> Self {
        self.claims.insert(element.to_string(), script);
        self
    }

    pub fn with_verdict(mut self, rule: &str, passed: bool) -> Self {
        self.verdicts.insert(rule.to_string(), passed);
        self
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn attest_count(&self) -> usize {
        self.attests.lock().unwrap().len()
    }

    pub fn attested_pairs(&self) -> Vec<(String, String)> {
        self.attests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.eid.clone(), r.pid.clone()))
            .collect()
    }

    pub fn claim_reads(&self, claim_id: &str) -> u32 {
        self.claim_reads
            .lock()
            .unwrap()
            .get(claim_id)
            .copied()
            .unwrap_or(0)
    }
}

fn claim_id_for(element: &str) -> String {
    format!("claim-{element}")
}

fn element_of(claim_id: &str) -> &str {
    claim_id.strip_prefix("claim-").unwrap_or(claim_id)
}

#[async_trait]
impl AttestationService for FakeService {
    fn base_url(&self) -> &str {
        "fake://attest"
    }

    async fn list_intents(&self) -> Result<Vec<IntentEntry>> {
        if self.list_fails {
            return Err(AttestError::transport("fake://attest/intents", "connection refused"));
        }
        Ok(self.intents.clone())
    }

    async fn intent_ids_by_name(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.intents_by_name.get(name).cloned().unwrap_or_default())
    }

    async fn intent_exists(&self, intent_id: &str) -> Result<bool> {
        Ok(self
            .intents_by_name
            .values()
            .any(|ids| ids.iter().any(|id| id == intent_id)))
    }

    async fn element_ids_by_name(&self, name: &str) -> Result<Vec<String>> {
        self.elements_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| AttestError::NotFound(format!("element name `{name}`")))
    }

    async fn open_session(&self) -> Result<String> {
        if self.open_fails {
            return Err(AttestError::service("too many sessions"));
        }
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("session-{n}"))
    }

    async fn close_session(&self, _session_id: &str) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn attest(&self, request: &AttestRequest) -> Result<String> {
        self.attests.lock().unwrap().push(request.clone());
        if self.attest_fails_for.contains(&request.eid) {
            return Err(AttestError::service("element unreachable"));
        }
        Ok(claim_id_for(&request.eid))
    }

    async fn get_claim(&self, _route: ClaimRoute, claim_id: &str) -> Result<Map<String, Value>> {
        let reads = {
            let mut all = self.claim_reads.lock().unwrap();
            let count = all.entry(claim_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let element = element_of(claim_id);
        let doc = match self.claims.get(element) {
            None => json!({ "itemid": claim_id, "body": { "element": element } }),
            Some(ClaimScript::ReadyAfter(n)) if reads > *n => {
                json!({ "itemid": claim_id, "body": { "element": element } })
            }
            Some(ClaimScript::ReadyAfter(_)) | Some(ClaimScript::Never) => {
                return Err(AttestError::NotFound(format!("claim `{claim_id}`")));
            }
            Some(ClaimScript::Broken(message)) => {
                return Err(AttestError::service(message.clone()));
            }
            Some(ClaimScript::Errored(message)) => json!({ "error": message }),
        };
        Ok(doc.as_object().cloned().unwrap_or_default())
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<Verdict> {
        self.verifies.lock().unwrap().push(request.clone());
        Ok(Verdict {
            result_id: format!("result-{}-{}", request.cid, request.rule),
            passed: self.verdicts.get(&request.rule).copied().unwrap_or(true),
        })
    }
}

/// Hands out the same fake for every base URL.
pub struct FakeConnector(pub Arc<FakeService>);

impl ServiceConnector for FakeConnector {
    fn connect(&self, _base_url: &str) -> std::result::Result<Arc<dyn AttestationService>, RunError> {
        let service: Arc<dyn AttestationService> = self.0.clone();
        Ok(service)
    }
}

/// Fails every connection attempt.
pub struct RefusingConnector;

impl ServiceConnector for RefusingConnector {
    fn connect(&self, base_url: &str) -> std::result::Result<Arc<dyn AttestationService>, RunError> {
        Err(RunError::Connect {
            url: base_url.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

pub fn executor_for(service: &Arc<FakeService>) -> PolicyExecutor {
    PolicyExecutor::new(
        Arc::new(FakeConnector(service.clone())),
        ExecutorSettings {
            claim_retry: RetryPolicy::new(Duration::from_millis(5), 10),
            ..Default::default()
        },
    )
}

pub fn attest_item(intent: &str, rules: &[&str]) -> AttestItem {
    AttestItem {
        intent_name: intent.to_string(),
        endpoint: "tpm0".to_string(),
        rules: rules.iter().map(|r| Rule::named(*r)).collect(),
    }
}

pub fn policy(name: &str, collection: Collection, attestations: Vec<AttestItem>) -> Policy {
    Policy {
        name: name.to_string(),
        description: format!("{name} checks"),
        service_url: "http://attest.test:8520".to_string(),
        collection,
        attestations,
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
