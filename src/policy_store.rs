//! Policy lookup.
//!
//! The executor only needs load-by-name; the `PolicyStore` trait keeps the
//! backend swappable. [`FilePolicyStore`] reads a directory of JSON policy
//! documents, [`MemoryPolicyStore`] holds policies handed to it directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::Policy;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Policy, StoreError>;

    /// All policies, ordered by name.
    async fn list(&self) -> Result<Vec<Policy>, StoreError>;

    /// Refreshes from the backing source. Returns the policy count afterwards.
    async fn reload(&self) -> Result<usize, StoreError>;
}

/// Policies loaded from every `*.json` file in a directory.
///
/// Files are read in file-name order; a policy whose name repeats an earlier
/// one replaces it. Files that fail to parse or carry no name are skipped.
pub struct FilePolicyStore {
    dir: PathBuf,
    policies: RwLock<BTreeMap<String, Policy>>,
}

impl FilePolicyStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let policies = load_dir(&dir)?;
        info!(dir = %dir.display(), policies = policies.len(), "loaded policy store");
        Ok(Self {
            dir,
            policies: RwLock::new(policies),
        })
    }

}

#[async_trait]
impl PolicyStore for FilePolicyStore {
    async fn get_by_name(&self, name: &str) -> Result<Policy, StoreError> {
        let found = match self.policies.read() {
            Ok(guard) => guard.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        };
        found.ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Policy>, StoreError> {
        let all = match self.policies.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        Ok(all)
    }

    /// Re-reads the directory and swaps in the new set. A failed read keeps
    /// the policies already loaded.
    async fn reload(&self) -> Result<usize, StoreError> {
        let fresh = load_dir(&self.dir)?;
        let count = fresh.len();
        match self.policies.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        info!(dir = %self.dir.display(), policies = count, "reloaded policy store");
        Ok(count)
    }
}

fn load_dir(dir: &Path) -> Result<BTreeMap<String, Policy>, StoreError> {
    let io_err = |source| StoreError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut policies = BTreeMap::new();
    for path in paths {
        match read_policy(&path) {
            Ok(policy) if policy.name.trim().is_empty() => {
                warn!(path = %path.display(), "skipping policy without a name");
            }
            Ok(policy) => {
                debug!(path = %path.display(), policy = %policy.name, "loaded policy");
                if policies.insert(policy.name.clone(), policy).is_some() {
                    warn!(path = %path.display(), "policy name repeated, later file wins");
                }
            }
            Err(e) => warn!(error = %e, "skipping unreadable policy"),
        }
    }
    Ok(policies)
}

/// Reads and parses one policy document.
pub fn read_policy(path: &Path) -> Result<Policy, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// In-memory policies keyed by name.
#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<BTreeMap<String, Policy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a policy by name.
    pub fn upsert(&self, policy: Policy) {
        match self.policies.write() {
            Ok(mut guard) => guard.insert(policy.name.clone(), policy),
            Err(poisoned) => poisoned.into_inner().insert(policy.name.clone(), policy),
        };
    }
}

impl FromIterator<Policy> for MemoryPolicyStore {
    fn from_iter<I: IntoIterator<Item = Policy>>(iter: I) -> Self {
        let store = Self::new();
        for policy in iter {
            store.upsert(policy);
        }
        store
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_by_name(&self, name: &str) -> Result<Policy, StoreError> {
        let found = match self.policies.read() {
            Ok(guard) => guard.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        };
        found.ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Policy>, StoreError> {
        let all = match self.policies.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        Ok(all)
    }

    /// Nothing backs the map, so this only reports the count.
    async fn reload(&self) -> Result<usize, StoreError> {
        let count = match self.policies.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        Ok(count)
    }
}
