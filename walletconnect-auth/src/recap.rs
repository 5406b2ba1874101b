//! ReCap capability URNs.
//!
//! A recap is `urn:recap:` followed by the unpadded base64url encoding of
//! `{"att": {resource: {"namespace/action": [caveats...]}}}`. Maps are kept
//! ordered so encoding and statement text are deterministic.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AuthError;

pub const RECAP_PREFIX: &str = "urn:recap:";

/// Ability name (`namespace/action`) to caveats.
pub type Abilities = BTreeMap<String, Vec<Value>>;

const STATEMENT_PREFIX: &str =
    "I further authorize the stated URI to perform the following actions on my behalf:";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recap {
    pub att: BTreeMap<String, Abilities>,
}

impl Recap {
    /// Grant `namespace/action` for every action on `resource`.
    pub fn new<I, S>(resource: impl Into<String>, namespace: &str, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let abilities = actions
            .into_iter()
            .map(|a| (format!("{}/{}", namespace, a.as_ref()), vec![Value::Object(Default::default())]))
            .collect();
        Self {
            att: BTreeMap::from([(resource.into(), abilities)]),
        }
    }

    pub fn parse(urn: &str) -> Result<Self, AuthError> {
        let encoded = urn
            .strip_prefix(RECAP_PREFIX)
            .ok_or_else(|| AuthError::InvalidRecap(format!("missing {} prefix", RECAP_PREFIX)))?;
        let json = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidRecap(e.to_string()))?;
        let recap: Recap =
            serde_json::from_slice(&json).map_err(|e| AuthError::InvalidRecap(e.to_string()))?;
        recap.validate()?;
        Ok(recap)
    }

    pub fn to_urn(&self) -> Result<String, AuthError> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("{}{}", RECAP_PREFIX, URL_SAFE_NO_PAD.encode(json)))
    }

    fn validate(&self) -> Result<(), AuthError> {
        for (resource, abilities) in &self.att {
            if resource.is_empty() {
                return Err(AuthError::InvalidRecap("empty resource".into()));
            }
            if let Some(bad) = abilities.keys().find(|a| split_ability(a).is_none()) {
                return Err(AuthError::InvalidRecap(format!("ability {:?} is not namespace/action", bad)));
            }
        }
        Ok(())
    }

    /// Fold `other` into `self`: union of resources, union of abilities per
    /// resource and union of caveats per ability.
    pub fn merge(&mut self, other: &Recap) {
        for (resource, abilities) in &other.att {
            let target = self.att.entry(resource.clone()).or_default();
            for (ability, caveats) in abilities {
                let existing = target.entry(ability.clone()).or_default();
                for caveat in caveats {
                    if !existing.contains(caveat) {
                        existing.push(caveat.clone());
                    }
                }
            }
        }
    }

    /// Actions granted under `namespace` on `resource`, sorted.
    pub fn actions(&self, resource: &str, namespace: &str) -> Vec<&str> {
        self.att
            .get(resource)
            .map(|abilities| {
                abilities
                    .keys()
                    .filter_map(|a| split_ability(a))
                    .filter(|(ns, _)| *ns == namespace)
                    .map(|(_, action)| action)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Human-readable statement, one numbered clause per resource and ability
    /// namespace, in sorted order.
    pub fn statement(&self) -> String {
        let mut clauses = Vec::new();
        for (resource, abilities) in &self.att {
            let mut by_namespace: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for (namespace, action) in abilities.keys().filter_map(|a| split_ability(a)) {
                by_namespace.entry(namespace).or_default().push(action);
            }
            for (namespace, actions) in by_namespace {
                let actions: Vec<String> = actions.iter().map(|a| format!("'{}'", a)).collect();
                clauses.push(format!(
                    "'{}': {} for '{}'.",
                    namespace,
                    actions.join(", "),
                    resource
                ));
            }
        }
        let numbered: Vec<String> = clauses
            .iter()
            .enumerate()
            .map(|(i, clause)| format!("({}) {}", i + 1, clause))
            .collect();
        format!("{} {}", STATEMENT_PREFIX, numbered.join(" "))
    }
}

fn split_ability(ability: &str) -> Option<(&str, &str)> {
    ability
        .split_once('/')
        .filter(|(ns, action)| !ns.is_empty() && !action.is_empty())
}

/// Merge recaps into one.
pub fn merge_recaps<'a>(recaps: impl IntoIterator<Item = &'a Recap>) -> Recap {
    recaps.into_iter().fold(Recap::default(), |mut acc, r| {
        acc.merge(r);
        acc
    })
}

/// Merge recap URNs into a single URN.
pub fn merge_urns<S: AsRef<str>>(urns: &[S]) -> Result<String, AuthError> {
    let recaps = urns
        .iter()
        .map(|u| Recap::parse(u.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    merge_recaps(&recaps).to_urn()
}

pub fn is_recap(resource: &str) -> bool {
    resource.starts_with(RECAP_PREFIX)
}

/// The recap carried by `resources`. Several recaps are merged.
pub fn find_recap(resources: &[String]) -> Result<Option<Recap>, AuthError> {
    let recaps = resources
        .iter()
        .filter(|r| is_recap(r))
        .map(|r| Recap::parse(r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!recaps.is_empty()).then(|| merge_recaps(&recaps)))
}
