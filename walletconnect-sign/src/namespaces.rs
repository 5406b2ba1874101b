//! Namespaces: the permission sets negotiated for a session.
//!
//! A proposal namespace key is either a CAIP-2 namespace (`eip155`) with an
//! explicit `chains` list, or a full chain id (`eip155:1`) without one. A
//! session namespace grants accounts; its chains are the explicit `chains`
//! plus every account's chain.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use walletconnect_core::{Account, Blockchain, Reason};

/// Requested permissions for one namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<BTreeSet<Blockchain>>,
    #[serde(default)]
    pub methods: BTreeSet<String>,
    #[serde(default)]
    pub events: BTreeSet<String>,
}

impl ProposalNamespace {
    pub fn new<C, M, E>(chains: C, methods: M, events: E) -> Self
    where
        C: IntoIterator<Item = Blockchain>,
        M: IntoIterator,
        M::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let chains: BTreeSet<Blockchain> = chains.into_iter().collect();
        Self {
            chains: (!chains.is_empty()).then_some(chains),
            methods: methods.into_iter().map(Into::into).collect(),
            events: events.into_iter().map(Into::into).collect(),
        }
    }
}

/// Granted permissions for one namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<BTreeSet<Blockchain>>,
    pub accounts: BTreeSet<Account>,
    #[serde(default)]
    pub methods: BTreeSet<String>,
    #[serde(default)]
    pub events: BTreeSet<String>,
}

impl SessionNamespace {
    pub fn new<A, M, E>(accounts: A, methods: M, events: E) -> Self
    where
        A: IntoIterator<Item = Account>,
        M: IntoIterator,
        M::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            chains: None,
            accounts: accounts.into_iter().collect(),
            methods: methods.into_iter().map(Into::into).collect(),
            events: events.into_iter().map(Into::into).collect(),
        }
    }

    /// Explicit chains plus the chain of every account.
    pub fn all_chains(&self) -> BTreeSet<Blockchain> {
        let mut chains: BTreeSet<Blockchain> = self.chains.clone().unwrap_or_default();
        chains.extend(self.accounts.iter().map(|a| a.blockchain().clone()));
        chains
    }
}

pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;
pub type SessionNamespaces = BTreeMap<String, SessionNamespace>;

/// Why a set of namespaces was refused. Each maps to a protocol reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("unsupported namespace key {0}")]
    UnsupportedNamespaceKey(String),
    #[error("unsupported chains in {0}")]
    UnsupportedChains(String),
    #[error("unsupported methods in {0}")]
    UnsupportedMethods(String),
    #[error("unsupported events in {0}")]
    UnsupportedEvents(String),
    #[error("unsupported accounts in {0}")]
    UnsupportedAccounts(String),
}

impl NamespaceError {
    pub fn reason(&self) -> Reason {
        let (reason, detail) = match self {
            Self::UnsupportedNamespaceKey(k) => (Reason::unsupported_namespace_key(), k),
            Self::UnsupportedChains(k) => (Reason::unsupported_chains(), k),
            Self::UnsupportedMethods(k) => (Reason::unsupported_methods(), k),
            Self::UnsupportedEvents(k) => (Reason::unsupported_events(), k),
            Self::UnsupportedAccounts(k) => (Reason::unsupported_accounts(), k),
        };
        let message = format!("{}: {}", reason.message, detail);
        reason.with_message(message)
    }
}

/// A key is a chain id when it has a reference part.
fn key_as_chain(key: &str) -> Option<Result<Blockchain, NamespaceError>> {
    key.contains(':').then(|| {
        key.parse::<Blockchain>()
            .map_err(|_| NamespaceError::UnsupportedNamespaceKey(key.to_string()))
    })
}

/// Check the shape of requested namespaces.
pub fn validate_proposal_namespaces(namespaces: &ProposalNamespaces) -> Result<(), NamespaceError> {
    for (key, namespace) in namespaces {
        match key_as_chain(key) {
            Some(chain) => {
                chain?;
                if namespace.chains.as_ref().is_some_and(|c| !c.is_empty()) {
                    return Err(NamespaceError::UnsupportedChains(key.clone()));
                }
            }
            None => {
                if key.is_empty() {
                    return Err(NamespaceError::UnsupportedNamespaceKey(key.clone()));
                }
                let chains = namespace
                    .chains
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| NamespaceError::UnsupportedChains(key.clone()))?;
                if chains.iter().any(|c| c.namespace() != key) {
                    return Err(NamespaceError::UnsupportedChains(key.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Check the shape of granted namespaces: every account filed under its own
/// namespace, explicit chains consistent with the key and the accounts.
pub fn validate_session_namespaces(namespaces: &SessionNamespaces) -> Result<(), NamespaceError> {
    if namespaces.is_empty() {
        return Err(NamespaceError::UnsupportedNamespaceKey("<empty>".into()));
    }
    for (key, namespace) in namespaces {
        if namespace.accounts.is_empty() {
            return Err(NamespaceError::UnsupportedAccounts(key.clone()));
        }
        match key_as_chain(key) {
            Some(chain) => {
                let chain = chain?;
                if namespace.accounts.iter().any(|a| a.blockchain() != &chain) {
                    return Err(NamespaceError::UnsupportedAccounts(key.clone()));
                }
            }
            None => {
                if namespace.accounts.iter().any(|a| a.namespace() != key) {
                    return Err(NamespaceError::UnsupportedAccounts(key.clone()));
                }
                if let Some(chains) = &namespace.chains {
                    if chains.iter().any(|c| c.namespace() != key) {
                        return Err(NamespaceError::UnsupportedChains(key.clone()));
                    }
                    if namespace.accounts.iter().any(|a| !chains.contains(a.blockchain())) {
                        return Err(NamespaceError::UnsupportedAccounts(key.clone()));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Check that `granted` covers every chain, method and event in `required`.
pub fn validate_approval(
    required: &ProposalNamespaces,
    granted: &SessionNamespaces,
) -> Result<(), NamespaceError> {
    for (key, requested) in required {
        let (namespace_key, required_chains) = match key_as_chain(key) {
            Some(chain) => {
                let chain = chain?;
                (chain.namespace().to_string(), BTreeSet::from([chain]))
            }
            None => (key.clone(), requested.chains.clone().unwrap_or_default()),
        };

        // A chain-keyed requirement may be granted under the chain key itself
        // or under its namespace.
        let candidates: Vec<&SessionNamespace> = [key.as_str(), namespace_key.as_str()]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|k| granted.get(k))
            .collect();
        if candidates.is_empty() {
            return Err(NamespaceError::UnsupportedNamespaceKey(key.clone()));
        }

        let chains: BTreeSet<Blockchain> = candidates.iter().flat_map(|n| n.all_chains()).collect();
        let methods: BTreeSet<&String> = candidates.iter().flat_map(|n| n.methods.iter()).collect();
        let events: BTreeSet<&String> = candidates.iter().flat_map(|n| n.events.iter()).collect();

        if !required_chains.is_subset(&chains) {
            return Err(NamespaceError::UnsupportedChains(key.clone()));
        }
        if !requested.methods.iter().all(|m| methods.contains(m)) {
            return Err(NamespaceError::UnsupportedMethods(key.clone()));
        }
        if !requested.events.iter().all(|e| events.contains(e)) {
            return Err(NamespaceError::UnsupportedEvents(key.clone()));
        }
    }
    Ok(())
}

/// Namespace granting `chain`, if any.
pub fn namespace_for_chain<'a>(
    namespaces: &'a SessionNamespaces,
    chain: &Blockchain,
) -> Option<&'a SessionNamespace> {
    [chain.to_string(), chain.namespace().to_string()]
        .iter()
        .filter_map(|k| namespaces.get(k))
        .find(|n| n.all_chains().contains(chain))
}
