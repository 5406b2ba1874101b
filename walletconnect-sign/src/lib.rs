//! WalletConnect v2 sign protocol.
//!
//! Sessions are negotiated over a pairing (`wc_sessionPropose`), settled on a
//! topic both sides derive from a fresh key agreement (`wc_sessionSettle`) and
//! then carry permissioned requests, events, updates and pings until one side
//! deletes them or they expire.
//!
//! ```ignore
//! let sign = SignEngine::new(core.clone());
//! sign.start().await?;
//! let connect = sign.connect(required, None, None).await?;
//! // show connect.uri to the wallet, then wait for SignEvent::SessionSettled
//! ```

pub mod engine;
pub mod events;
pub mod namespaces;
pub mod params;
pub mod session;

pub use engine::{ConnectResult, SignEngine};
pub use events::{SessionRequest, SessionResponse, SignEvent};
pub use namespaces::{
    NamespaceError, ProposalNamespace, ProposalNamespaces, SessionNamespace, SessionNamespaces,
};
pub use params::{Event, Request};
pub use session::{Proposal, Session};

use walletconnect_core::crypto::KeyError;
use walletconnect_core::history::HistoryError;
use walletconnect_core::pairing::PairingError;
use walletconnect_core::relay::RelayError;
use walletconnect_core::storage::StorageError;
use walletconnect_core::{ErrorCode, Reason, WalletConnectError};

pub type Result<T> = std::result::Result<T, SignError>;

/// Sign protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error(transparent)]
    Core(#[from] WalletConnectError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error("no session for topic {0}")]
    NoSession(String),

    #[error("no proposal from {0}")]
    NoProposal(String),

    #[error("proposal from {0} expired")]
    ProposalExpired(String),

    #[error("only the controller may update a session")]
    UnauthorizedNonControllerCall,

    #[error("chain {0} is not part of the session")]
    UnauthorizedChain(String),

    #[error("method {method} not permitted on {chain}")]
    UnauthorizedMethod { method: String, chain: String },

    #[error("event {event} not permitted on {chain}")]
    UnauthorizedEvent { event: String, chain: String },

    #[error("expiry must increase and stay within the session lifetime")]
    InvalidUpdateExpiryValue,

    #[error("peer replied with error: {0}")]
    Peer(Reason),
}

impl SignError {
    /// Numeric code: core codes for wrapped errors, 6xxx for sign errors.
    pub fn code(&self) -> i32 {
        match self {
            Self::Core(e) => e.code() as i32,
            Self::Namespace(_) => 6000,
            Self::NoSession(_) => 6001,
            Self::NoProposal(_) => 6002,
            Self::ProposalExpired(_) => 6003,
            Self::UnauthorizedNonControllerCall => 6004,
            Self::UnauthorizedChain(_) | Self::UnauthorizedMethod { .. } | Self::UnauthorizedEvent { .. } => 6005,
            Self::InvalidUpdateExpiryValue => ErrorCode::InvalidUpdateExpiryValue as i32,
            Self::Peer(_) => ErrorCode::Peer as i32,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_retryable())
    }

    /// The reason to send a peer for this error, when there is one.
    pub fn reason(&self) -> Option<Reason> {
        match self {
            Self::Namespace(e) => Some(e.reason()),
            Self::UnauthorizedNonControllerCall => Some(Reason::unauthorized_update_request()),
            Self::UnauthorizedChain(_) => Some(Reason::unauthorized_chain()),
            Self::UnauthorizedMethod { .. } => Some(Reason::unauthorized_method()),
            Self::UnauthorizedEvent { .. } => Some(Reason::unauthorized_event()),
            Self::ProposalExpired(_) => Some(Reason::request_expired()),
            Self::Peer(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

macro_rules! via_core {
    ($($from:ty),*) => {$(
        impl From<$from> for SignError {
            fn from(err: $from) -> Self {
                Self::Core(WalletConnectError::from(err))
            }
        }
    )*};
}

via_core!(StorageError, KeyError, PairingError, RelayError, HistoryError, serde_json::Error);
