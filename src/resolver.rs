//! Turns policy-declared names into service-side identifiers.
//!
//! Only the intent listing can fail a run. Every other lookup failure is
//! logged and degrades to fewer entries, which later shows up as failed pairs.

use tracing::{debug, info, warn};

use crate::client::AttestationService;
use crate::error::AttestError;
use crate::model::{normalize_intent_name, Collection, ElementSet, IntentIndex};

/// Outcome of resolving one intent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Unresolved,
}

/// One way of turning an intent name into an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStrategy {
    /// `GET /intents/name/{name}`, first identifier wins
    ByNameQuery,
    /// Treat the name as an identifier if `GET /intent/{name}` finds it
    DirectIdCheck,
}

impl IntentStrategy {
    pub const DEFAULT_ORDER: [IntentStrategy; 2] =
        [IntentStrategy::ByNameQuery, IntentStrategy::DirectIdCheck];

    fn label(self) -> &'static str {
        match self {
            Self::ByNameQuery => "by-name",
            Self::DirectIdCheck => "direct-id",
        }
    }

    async fn attempt(
        self,
        service: &dyn AttestationService,
        name: &str,
    ) -> Result<Option<String>, AttestError> {
        match self {
            Self::ByNameQuery => Ok(service
                .intent_ids_by_name(name)
                .await?
                .into_iter()
                .find(|id| !id.trim().is_empty())),
            Self::DirectIdCheck => Ok(service
                .intent_exists(name)
                .await?
                .then(|| name.to_string())),
        }
    }
}

pub struct IdentifierResolver<'a> {
    service: &'a dyn AttestationService,
    strategies: Vec<IntentStrategy>,
}

impl<'a> IdentifierResolver<'a> {
    pub fn new(service: &'a dyn AttestationService) -> Self {
        Self::with_strategies(service, IntentStrategy::DEFAULT_ORDER.to_vec())
    }

    pub fn with_strategies(service: &'a dyn AttestationService, strategies: Vec<IntentStrategy>) -> Self {
        Self {
            service,
            strategies,
        }
    }

    /// Tries each strategy in order; the first identifier found wins.
    pub async fn resolve_intent(&self, name: &str) -> Resolution {
        for strategy in &self.strategies {
            match strategy.attempt(self.service, name).await {
                Ok(Some(id)) => {
                    debug!(intent = name, id = %id, strategy = strategy.label(), "resolved intent");
                    return Resolution::Resolved(id);
                }
                Ok(None) => {
                    debug!(intent = name, strategy = strategy.label(), "intent strategy found nothing");
                }
                Err(e) => {
                    warn!(intent = name, strategy = strategy.label(), error = %e, "intent strategy failed");
                }
            }
        }
        Resolution::Unresolved
    }

    /// Builds the intent index from the service's full intent listing.
    ///
    /// Failing to list intents is fatal for the run; an intent that cannot be
    /// resolved is left out of the index.
    pub async fn build_intent_index(&self) -> Result<IntentIndex, AttestError> {
        let entries = self.service.list_intents().await?;
        let mut index = IntentIndex::new();

        for entry in &entries {
            let normalized = normalize_intent_name(entry.name());
            if let Some(id) = entry.listed_id() {
                index.insert(&normalized, id);
                continue;
            }
            match self.resolve_intent(&normalized).await {
                Resolution::Resolved(id) => index.insert(&normalized, id),
                Resolution::Unresolved => {
                    warn!(intent = %normalized, "could not resolve intent identifier");
                }
            }
        }

        info!(
            listed = entries.len(),
            indexed = index.len(),
            "built intent index"
        );
        Ok(index)
    }

    /// Resolves the policy's collection into a deduplicated element set.
    ///
    /// Never fails: a name that cannot be resolved contributes nothing.
    pub async fn resolve_elements(&self, collection: &Collection) -> ElementSet {
        let mut elements: ElementSet = collection.items.iter().collect();

        for name in &collection.names {
            match self.service.element_ids_by_name(name).await {
                Ok(ids) => {
                    debug!(name = %name, found = ids.len(), "resolved element name");
                    for id in &ids {
                        elements.insert(id);
                    }
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "could not resolve element name");
                }
            }
        }

        if !collection.tags.is_empty() {
            debug!(tags = ?collection.tags, "element tag hints are not resolved");
        }

        info!(elements = elements.len(), "resolved element set");
        elements
    }
}
