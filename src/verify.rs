//! Rule verification against a retrieved claim.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{AttestationService, VerifyRequest};
use crate::model::{Rule, RuleResult};

/// How an attestation with no rules is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyRules {
    /// Nothing to check counts as a pass
    #[default]
    Pass,
    /// Nothing to check counts as a failure
    Fail,
}

/// Aggregate verdict of one claim's rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleVerdict {
    pub passed: bool,
    pub results: Vec<RuleResult>,
}

/// Runs every rule in declaration order; one [`RuleResult`] per rule.
///
/// A failed verify call becomes a failed rule result, never an error. The
/// claim passes only if every rule passed.
pub async fn verify_rules(
    service: &dyn AttestationService,
    claim_id: &str,
    session_id: &str,
    rules: &[Rule],
    empty_rules: EmptyRules,
) -> RuleVerdict {
    if rules.is_empty() {
        return RuleVerdict {
            passed: empty_rules == EmptyRules::Pass,
            results: Vec::new(),
        };
    }

    let mut results = Vec::with_capacity(rules.len());
    for rule in rules {
        let request = VerifyRequest::new(claim_id, &rule.name, session_id);
        match service.verify(&request).await {
            Ok(verdict) => {
                debug!(claim_id, rule = %rule.name, passed = verdict.passed, "rule verified");
                results.push(RuleResult::verified(&rule.name, verdict.result_id, verdict.passed));
            }
            Err(e) => {
                warn!(claim_id, rule = %rule.name, error = %e, "rule verification failed");
                results.push(RuleResult::errored(&rule.name, e.to_string()));
            }
        }
    }

    RuleVerdict {
        passed: results.iter().all(|r| r.passed),
        results,
    }
}
