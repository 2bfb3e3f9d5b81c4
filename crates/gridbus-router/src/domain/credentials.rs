//! Credential store: persistent mapping of credential token → identity,
//! capabilities, and groups.
//!
//! The store is loaded at router start from a JSON file:
//!
//! ```json
//! {
//!   "credentials": {
//!     "k1-public-key": {
//!       "identity": "hist1",
//!       "capabilities": ["publish:devices/#"],
//!       "groups": ["historians"]
//!     }
//!   },
//!   "groups": {
//!     "historians": ["subscribe:devices/#", "call:query"]
//!   }
//! }
//! ```
//!
//! Hot reload is a snapshot swap: the auth gate re-checks capabilities
//! against the current snapshot on every operation, so a changed or removed
//! credential takes effect on the next auth attempt or next operation, not
//! retroactively for frames already dispatched.

use gridbus_types::{Credential, Identity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// One credential's record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// Default identity bound to this credential.
    pub identity: Identity,
    /// Directly granted capabilities, `verb:pattern` form.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Groups whose capabilities this credential inherits.
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

/// On-disk layout of the credential file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    credentials: BTreeMap<String, CredentialEntry>,
    #[serde(default)]
    groups: BTreeMap<String, BTreeSet<String>>,
}

/// Errors produced while loading the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    /// File could not be read.
    #[error("failed to read credential file: {0}")]
    Io(#[from] std::io::Error),
    /// File was not valid JSON for the expected layout.
    #[error("failed to parse credential file: {0}")]
    Parse(#[from] serde_json::Error),
    /// A credential token failed validation.
    #[error("invalid credential token {token:?}: {source}")]
    InvalidToken {
        token: String,
        source: gridbus_types::IdentityError,
    },
    /// Two credentials claim the same default identity.
    #[error("identity {identity} is bound to more than one credential")]
    DuplicateIdentity { identity: Identity },
}

/// In-memory snapshot of the credential file.
///
/// Immutable after load; hot reload replaces the whole snapshot inside the
/// dispatch task, so lookups never observe a half-applied file.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    credentials: HashMap<Credential, CredentialEntry>,
    groups: HashMap<String, BTreeSet<String>>,
}

impl CredentialStore {
    /// An empty store: every auth attempt is rejected as unknown.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load and validate a credential file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialStoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let store = Self::parse(&raw)?;
        info!(
            path = %path.as_ref().display(),
            credentials = store.credentials.len(),
            groups = store.groups.len(),
            "Credential store loaded"
        );
        Ok(store)
    }

    /// Parse the JSON layout from a string (the file-less path for tests
    /// and embedded configuration).
    pub fn parse(raw: &str) -> Result<Self, CredentialStoreError> {
        let file: CredentialFile = serde_json::from_str(raw)?;

        let mut credentials = HashMap::with_capacity(file.credentials.len());
        let mut seen_identities = BTreeSet::new();
        for (token, entry) in file.credentials {
            let credential = Credential::new(token.clone())
                .map_err(|source| CredentialStoreError::InvalidToken { token, source })?;
            if !seen_identities.insert(entry.identity.clone()) {
                return Err(CredentialStoreError::DuplicateIdentity {
                    identity: entry.identity,
                });
            }
            for group in &entry.groups {
                if !file.groups.contains_key(group) {
                    warn!(
                        identity = %entry.identity,
                        group = %group,
                        "Credential references undefined group"
                    );
                }
            }
            credentials.insert(credential, entry);
        }

        Ok(Self {
            credentials,
            groups: file.groups.into_iter().collect(),
        })
    }

    /// Record for a credential, if known.
    #[must_use]
    pub fn lookup(&self, credential: &Credential) -> Option<&CredentialEntry> {
        self.credentials.get(credential)
    }

    /// Effective capability set for a credential: direct grants unioned
    /// with every referenced group's grants. `None` when unknown.
    #[must_use]
    pub fn capabilities_for(&self, credential: &Credential) -> Option<BTreeSet<String>> {
        let entry = self.credentials.get(credential)?;
        let mut caps = entry.capabilities.clone();
        for group in &entry.groups {
            if let Some(group_caps) = self.groups.get(group) {
                caps.extend(group_caps.iter().cloned());
            }
        }
        Some(caps)
    }

    /// Number of credentials in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// True when no credentials are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Insert an entry directly. Test scaffolding; production snapshots
    /// come from [`CredentialStore::load`].
    pub fn insert(&mut self, credential: Credential, entry: CredentialEntry) {
        self.credentials.insert(credential, entry);
    }

    /// Define a group directly. Test scaffolding.
    pub fn insert_group(&mut self, name: impl Into<String>, caps: BTreeSet<String>) {
        self.groups.insert(name.into(), caps);
    }
}
