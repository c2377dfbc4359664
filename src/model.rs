//! Policy documents and the per-pair results a run produces.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Marker some service versions put in `message` when a claim is missing.
const NOT_FOUND_MARKER: &str = "Not Found";

/// Declarative description of which elements to attest and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base URL of the attestation service this policy runs against
    #[serde(rename = "jane", alias = "service_url")]
    pub service_url: String,
    #[serde(default)]
    pub collection: Collection,
    #[serde(default)]
    pub attestations: Vec<AttestItem>,
}

/// Election criteria for the elements a policy targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Explicit element identifiers
    #[serde(default)]
    pub items: Vec<String>,
    /// Tag hints; carried but not resolved against the service
    #[serde(default)]
    pub tags: Vec<String>,
    /// Element names resolved through `/elements/name/{name}`
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestItem {
    #[serde(rename = "intent")]
    pub intent_name: String,
    /// Remote execution target name
    pub endpoint: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A named check evaluated by the service's verify call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default, rename = "rvariable", skip_serializing_if = "String::is_empty")]
    pub variable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub decision: String,
}

impl Rule {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variable: String::new(),
            parameter: String::new(),
            decision: String::new(),
        }
    }
}

/// Deduplicated element identifiers for one run, iterated in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSet(BTreeSet<String>);

impl ElementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an identifier, trimming it first. Blank identifiers are dropped.
    pub fn insert(&mut self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        self.0.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ElementSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id.as_ref());
        }
        set
    }
}

/// Intent names compare with all whitespace removed.
pub fn normalize_intent_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Normalized intent name to service-side intent identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentIndex(BTreeMap<String, String>);

impl IntentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: impl Into<String>) {
        self.0.insert(normalize_intent_name(name), id.into());
    }

    /// Looks up a policy-declared intent name, normalizing it the same way.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&normalize_intent_name(name)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Evidence document returned by the service, or the error that took its place.
///
/// Serializes as the raw document, or as `{"error": "..."}` for the error
/// variant. Deserializing classifies the object with [`Claim::from_document`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Claim {
    Error { error: String },
    Document(Map<String, Value>),
}

impl<'de> Deserialize<'de> for Claim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Claim::from_document)
    }
}

impl Claim {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Classifies a document fetched from the service.
    ///
    /// A non-empty `error` string or a `"Not Found"` message marks the claim as
    /// a service-reported failure.
    pub fn from_document(fields: Map<String, Value>) -> Self {
        if let Some(error) = fields.get("error").and_then(Value::as_str) {
            if !error.trim().is_empty() {
                return Self::error(error);
            }
        }
        if let Some(message) = fields.get("message").and_then(Value::as_str) {
            if message.contains(NOT_FOUND_MARKER) {
                return Self::error(message);
            }
        }
        Self::Document(fields)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error } => Some(error),
            Self::Document(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Whether a rule produced a verdict or failed to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleOutcome {
    Verified { result_id: String },
    Errored { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    #[serde(rename = "rule")]
    pub rule_name: String,
    pub passed: bool,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
}

impl RuleResult {
    pub fn verified(rule: &str, result_id: impl Into<String>, passed: bool) -> Self {
        Self {
            rule_name: rule.to_string(),
            passed,
            outcome: RuleOutcome::Verified {
                result_id: result_id.into(),
            },
        }
    }

    pub fn errored(rule: &str, error: impl Into<String>) -> Self {
        Self {
            rule_name: rule.to_string(),
            passed: false,
            outcome: RuleOutcome::Errored {
                error: error.into(),
            },
        }
    }
}

/// Outcome of one (element, intent) pair. Produced for every pair of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationResult {
    pub element_id: String,
    #[serde(rename = "intent")]
    pub intent_name: String,
    pub claim: Claim,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    pub passed: bool,
    #[serde(default)]
    pub rule_results: Vec<RuleResult>,
}

impl AttestationResult {
    /// A pair that failed before any rule could be evaluated.
    pub fn failed(
        element_id: &str,
        intent_name: &str,
        claim_id: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            element_id: element_id.to_string(),
            intent_name: intent_name.to_string(),
            claim: Claim::error(error),
            claim_id,
            passed: false,
            rule_results: Vec::new(),
        }
    }
}
