//! Pairings: the long-lived encrypted channel two peers share out of band.
//!
//! A pairing starts inactive (short lifetime) when one side creates a URI or
//! the other side scans it, and becomes active once application traffic
//! succeeds over it. Sessions and auth requests are proposed over pairings.

mod engine;
mod model;
mod uri;

pub use engine::PairingEngine;
pub use model::Pairing;
pub use uri::{WalletConnectUri, PROTOCOL_VERSION, URI_SCHEME};

use crate::reason::Reason;
use crate::{AppMetadata, Topic};

/// Errors from pairing operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PairingError {
    #[error("malformed pairing URI: {0}")]
    MalformedPairingUri(String),

    #[error("pairing already exists: {0}")]
    PairingAlreadyExists(String),

    #[error("no pairing for topic {0}")]
    NoPairing(String),

    #[error("expiry must increase and stay within the pairing lifetime")]
    InvalidUpdateExpiryValue,

    #[error("method not supported on this pairing: {0}")]
    MethodUnsupported(String),

    #[error("peer replied with error: {0}")]
    Peer(Reason),
}

/// Pairing lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingEvent {
    /// We created a pairing and are waiting for a peer.
    Created { topic: Topic },
    /// We joined a pairing from a URI.
    Paired { topic: Topic },
    Activated {
        topic: Topic,
        peer_metadata: Option<AppMetadata>,
    },
    Extended { topic: Topic, expiry: i64 },
    /// The peer pinged us.
    Pinged { topic: Topic },
    /// The pairing was deleted, by us or by the peer.
    Deleted { topic: Topic, reason: Reason },
    Expired { topic: Topic },
}

impl PairingEvent {
    pub fn topic(&self) -> &Topic {
        match self {
            Self::Created { topic }
            | Self::Paired { topic }
            | Self::Activated { topic, .. }
            | Self::Extended { topic, .. }
            | Self::Pinged { topic }
            | Self::Deleted { topic, .. }
            | Self::Expired { topic } => topic,
        }
    }
}
