//! Policy-driven orchestration of a remote attestation service.
//!
//! A [`Policy`] names elements, intents and rules. [`PolicyExecutor`] resolves
//! them against the service, opens a session, attests every (element, intent)
//! pair, waits for each claim and verifies its rules. The result is one
//! [`AttestationResult`] per pair, or a single [`RunError`] if the run could
//! not start.

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod model;
pub mod policy_store;
pub mod poller;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod verify;

pub use cancel::{CancelSignal, RunCancellation};
pub use client::{
    AttestationService, ClaimRoute, ClientSettings, HttpAttestationService, HttpConnector,
    ServiceConnector,
};
pub use config::OrchestratorConfig;
pub use error::{AttestError, RunError, StoreError};
pub use executor::{Execution, ExecutorSettings, PolicyExecutor, PolicyRun, RunSummary};
pub use model::{
    AttestItem, AttestationResult, Claim, Collection, ElementSet, IntentIndex, Policy, Rule,
    RuleOutcome, RuleResult,
};
pub use policy_store::{FilePolicyStore, MemoryPolicyStore, PolicyStore};
pub use retry::RetryPolicy;
pub use verify::EmptyRules;
