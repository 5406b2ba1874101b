//! Session and proposal records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use walletconnect_core::config::{PROPOSAL_TTL, SESSION_TTL};
use walletconnect_core::history::Origin;
use walletconnect_core::{expiry, Account, Blockchain, Participant, RelayProtocolOptions, RpcId, Topic};

use crate::namespaces::{namespace_for_chain, ProposalNamespaces, SessionNamespaces};
use crate::params::SessionProposeParams;
use crate::SignError;

/// A settled session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: Topic,
    pub pairing_topic: Topic,
    pub relay: RelayProtocolOptions,
    pub self_participant: Participant,
    pub peer_participant: Participant,
    /// Public key (hex) of the side whose updates are authoritative.
    pub controller: String,
    pub namespaces: SessionNamespaces,
    pub required_namespaces: ProposalNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_namespaces: Option<ProposalNamespaces>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<BTreeMap<String, String>>,
    /// Unix seconds.
    pub expiry: i64,
    /// Whether the peer confirmed the settlement.
    pub acknowledged: bool,
}

impl Session {
    pub fn is_controller(&self) -> bool {
        self.self_participant.public_key == self.controller
    }

    pub fn is_expired(&self, now: i64) -> bool {
        expiry::is_expired(self.expiry, now)
    }

    /// Every chain the session grants.
    pub fn chains(&self) -> BTreeSet<Blockchain> {
        self.namespaces.values().flat_map(|n| n.all_chains()).collect()
    }

    pub fn accounts(&self) -> BTreeSet<Account> {
        self.namespaces
            .values()
            .flat_map(|n| n.accounts.iter().cloned())
            .collect()
    }

    pub fn has_chain(&self, chain: &Blockchain) -> bool {
        namespace_for_chain(&self.namespaces, chain).is_some()
    }

    pub fn has_permission_for_method(&self, method: &str, chain: &Blockchain) -> bool {
        namespace_for_chain(&self.namespaces, chain).is_some_and(|n| n.methods.contains(method))
    }

    pub fn has_permission_for_event(&self, event: &str, chain: &Blockchain) -> bool {
        namespace_for_chain(&self.namespaces, chain).is_some_and(|n| n.events.contains(event))
    }

    /// Extend by `ttl` seconds, never past `now + SESSION_TTL`.
    pub fn update_expiry_by(&mut self, ttl: i64, now: i64) -> Result<i64, SignError> {
        self.expiry = expiry::extend_by(self.expiry, ttl, now, SESSION_TTL)
            .ok_or(SignError::InvalidUpdateExpiryValue)?;
        Ok(self.expiry)
    }

    /// Move to the absolute time `expiry`, never past `now + SESSION_TTL`.
    pub fn update_expiry_to(&mut self, expiry: i64, now: i64) -> Result<i64, SignError> {
        self.expiry = expiry::extend_to(self.expiry, expiry, now, SESSION_TTL)
            .ok_or(SignError::InvalidUpdateExpiryValue)?;
        Ok(self.expiry)
    }
}

/// A proposal we sent or received, keyed by the proposer's public key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Id of the `wc_sessionPropose` request.
    pub id: RpcId,
    pub pairing_topic: Topic,
    pub origin: Origin,
    pub params: SessionProposeParams,
    /// Session topic once the responder's key is known (proposer side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_topic: Option<Topic>,
    /// Key the responder answered with; the settle must name it as controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_public_key: Option<String>,
    pub expiry: i64,
}

impl Proposal {
    pub fn new(id: RpcId, pairing_topic: Topic, origin: Origin, params: SessionProposeParams, now: i64) -> Self {
        let expiry = params
            .expiry_timestamp
            .unwrap_or(now + PROPOSAL_TTL)
            .min(now + PROPOSAL_TTL);
        Self {
            id,
            pairing_topic,
            origin,
            params,
            session_topic: None,
            responder_public_key: None,
            expiry,
        }
    }

    pub fn proposer_public_key(&self) -> &str {
        &self.params.proposer.public_key
    }

    pub fn is_expired(&self, now: i64) -> bool {
        expiry::is_expired(self.expiry, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::SessionNamespace;
    use walletconnect_core::config::DAY;
    use walletconnect_core::AppMetadata;

    const NOW: i64 = 1_700_000_000;

    fn participant(key: &str) -> Participant {
        Participant {
            public_key: key.into(),
            metadata: AppMetadata::new(key, "https://example.com"),
        }
    }

    fn session() -> Session {
        Session {
            topic: Topic::generate(),
            pairing_topic: Topic::generate(),
            relay: RelayProtocolOptions::default(),
            self_participant: participant("aa"),
            peer_participant: participant("bb"),
            controller: "aa".into(),
            namespaces: BTreeMap::from([(
                "eip155".to_string(),
                SessionNamespace::new(
                    ["eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb".parse::<Account>().unwrap()],
                    ["eth_sendTransaction"],
                    ["chainChanged"],
                ),
            )]),
            required_namespaces: ProposalNamespaces::new(),
            optional_namespaces: None,
            session_properties: None,
            expiry: NOW + SESSION_TTL,
            acknowledged: false,
        }
    }

    #[test]
    fn permissions() {
        let s = session();
        let mainnet: Blockchain = "eip155:1".parse().unwrap();
        let polygon: Blockchain = "eip155:137".parse().unwrap();
        assert!(s.is_controller());
        assert!(s.has_chain(&mainnet));
        assert!(!s.has_chain(&polygon));
        assert!(s.has_permission_for_method("eth_sendTransaction", &mainnet));
        assert!(!s.has_permission_for_method("eth_sign", &mainnet));
        assert!(!s.has_permission_for_method("eth_sendTransaction", &polygon));
        assert!(s.has_permission_for_event("chainChanged", &mainnet));
        assert_eq!(s.accounts().len(), 1);
    }

    #[test]
    fn forty_days_rejected_one_day_accepted() {
        let mut s = session();
        assert!(matches!(
            s.update_expiry_by(40 * DAY, NOW),
            Err(SignError::InvalidUpdateExpiryValue)
        ));
        assert_eq!(s.expiry, NOW + SESSION_TTL);

        // Four days later three days remain.
        let later = NOW + 4 * DAY;
        let before = s.expiry;
        let after = s.update_expiry_by(DAY, later).unwrap();
        assert!(after > before);
        assert_eq!(s.expiry, before + DAY);
    }

    #[test]
    fn proposal_expiry_is_capped() {
        let params: SessionProposeParams = serde_json::from_value(serde_json::json!({
            "relays": [{"protocol": "irn"}],
            "proposer": {"publicKey": "aa", "metadata": {"name": "d", "url": "u"}},
            "requiredNamespaces": {},
            "expiryTimestamp": NOW + 10 * DAY
        }))
        .unwrap();
        let p = Proposal::new(RpcId::Number(1), Topic::generate(), Origin::Remote, params, NOW);
        assert_eq!(p.expiry, NOW + PROPOSAL_TTL);
        assert_eq!(p.proposer_public_key(), "aa");
        assert!(p.is_expired(NOW + PROPOSAL_TTL));
    }
}
