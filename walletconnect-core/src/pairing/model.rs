use serde::{Deserialize, Serialize};

use super::{PairingError, WalletConnectUri};
use crate::config::{ACTIVE_PAIRING_TTL, INACTIVE_PAIRING_TTL};
use crate::crypto::SymmetricKey;
use crate::{expiry, AppMetadata, RelayProtocolOptions, Topic};

/// Persisted pairing record. Keys live in the key store, not here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub topic: Topic,
    pub relay: RelayProtocolOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_metadata: Option<AppMetadata>,
    /// Unix seconds.
    pub expiry: i64,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

impl Pairing {
    /// A new inactive pairing.
    pub fn new(topic: Topic, relay: RelayProtocolOptions, now: i64) -> Self {
        Self {
            topic,
            relay,
            peer_metadata: None,
            expiry: now + INACTIVE_PAIRING_TTL,
            active: false,
            methods: None,
        }
    }

    /// An inactive pairing joined from `uri`. A URI expiry shorter than the
    /// inactive lifetime wins.
    pub fn from_uri(uri: &WalletConnectUri, now: i64) -> Self {
        let mut pairing = Self::new(uri.topic.clone(), uri.relay.clone(), now);
        if let Some(expiry) = uri.expiry_timestamp {
            pairing.expiry = pairing.expiry.min(expiry);
        }
        pairing.methods = uri.methods.clone();
        pairing
    }

    pub fn is_expired(&self, now: i64) -> bool {
        expiry::is_expired(self.expiry, now)
    }

    /// Mark active and extend to the active lifetime. Never shortens.
    pub fn activate(&mut self, now: i64) {
        self.active = true;
        self.expiry = self.expiry.max(now + ACTIVE_PAIRING_TTL);
    }

    /// Extend the expiry by `ttl` seconds.
    pub fn update_expiry_by(&mut self, ttl: i64, now: i64) -> Result<i64, PairingError> {
        self.expiry = expiry::extend_by(self.expiry, ttl, now, ACTIVE_PAIRING_TTL)
            .ok_or(PairingError::InvalidUpdateExpiryValue)?;
        Ok(self.expiry)
    }

    /// Move the expiry to the absolute time `expiry`.
    pub fn update_expiry_to(&mut self, expiry: i64, now: i64) -> Result<i64, PairingError> {
        self.expiry = expiry::extend_to(self.expiry, expiry, now, ACTIVE_PAIRING_TTL)
            .ok_or(PairingError::InvalidUpdateExpiryValue)?;
        Ok(self.expiry)
    }

    /// Rebuild the URI for this pairing.
    pub fn uri(&self, sym_key: SymmetricKey) -> WalletConnectUri {
        let mut uri = WalletConnectUri::new(self.topic.clone(), sym_key, self.relay.clone())
            .with_expiry(self.expiry);
        uri.methods = self.methods.clone();
        uri
    }
}
