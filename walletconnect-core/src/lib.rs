//! WalletConnect v2 core.
//!
//! This crate holds everything two peers need before any application protocol
//! runs on top: X25519 key agreement and key storage, the envelope codec that
//! turns JSON-RPC payloads into topic-addressed ciphertext, the JSON-RPC history
//! ledger that rejects replays, the relay client and the pairing state machine.
//!
//! Storage, the relay socket and the blockchain signer are injected by the host
//! application through traits; nothing here opens a connection on its own.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use walletconnect_core::{Core, CoreConfig, AppMetadata};
//!
//! let core = Core::new(CoreConfig::new(metadata), socket, keychain, storage);
//! core.start().await?;
//!
//! // dApp side: share this URI with a wallet out of band
//! let uri = core.pairing().create(None).await?;
//! println!("{}", uri);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod caip;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod errors;
pub mod expiry;
pub mod history;
pub mod pairing;
pub mod reason;
pub mod relay;
pub mod rpc;
pub mod secure_storage;
pub mod storage;
mod sync;

/// In-memory relay hub and wiring helpers for tests.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod client;

pub use client::Core;
pub use caip::{Account, Blockchain, CaipError};
pub use config::CoreConfig;
pub use crypto::{AgreementPublicKey, AgreementSecret, KeyManagementService, SymmetricKey};
pub use envelope::{EnvelopeType, Serializer};
pub use errors::{ErrorCode, WalletConnectError};
pub use history::{RpcHistory, RpcHistoryRecord};
pub use pairing::{Pairing, PairingEngine, PairingEvent, WalletConnectUri};
pub use reason::Reason;
pub use relay::{NetworkingInteractor, RelayClient, RelaySocket};
pub use rpc::{RpcId, RpcRequest, RpcResponse};

/// Common result alias for core operations.
pub type Result<T> = std::result::Result<T, WalletConnectError>;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Address of a logical channel on the relay.
///
/// Always 64 hex characters: either random (pairing topics) or the SHA-256 of a
/// symmetric key or public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Length of a topic in hex characters.
    pub const LENGTH: usize = 64;

    /// Generate a fresh random topic.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Topic derived as `sha256(bytes)`.
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Get the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Topic {
    type Error = WalletConnectError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value.len() != Self::LENGTH || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WalletConnectError::InvalidTopic(value));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }
}

impl FromStr for Topic {
    type Err = WalletConnectError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relay options carried in URIs, proposals and settlements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocolOptions {
    /// Relay protocol name, `irn` for the public relay.
    pub protocol: String,
    /// Optional protocol-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RelayProtocolOptions {
    /// Options for the given protocol with no extra data.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            data: None,
        }
    }
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self::new(config::DEFAULT_RELAY_PROTOCOL)
    }
}

/// Deep-link targets of an application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal: Option<String>,
}

/// Descriptive metadata of a dApp or wallet. Passed through untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

impl AppMetadata {
    /// Metadata with a name and url; other fields empty.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an icon url.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icons.push(icon.into());
        self
    }
}

/// One side of a proposal, session or auth request: a public key and who owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// X25519 public key, hex encoded.
    pub public_key: String,
    pub metadata: AppMetadata,
}
