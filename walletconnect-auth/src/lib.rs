//! WalletConnect v2 authentication.
//!
//! A requester sends `wc_sessionAuthenticate` with a CAIP-122 payload over a
//! pairing. The responder signs one EIP-4361 message per account and answers
//! with the resulting CACAOs on a topic derived from the requester's public key
//! (`sha256(publicKey)`), sealed in a type-1 envelope since the two sides share
//! no key on that topic yet.
//!
//! Delegated permissions travel as ReCap URNs in the payload resources; see
//! [`recap`].

pub mod cacao;
pub mod engine;
pub mod payload;
pub mod recap;

pub use cacao::{sign_cacao, Cacao, CacaoHeader, CacaoPayload, CacaoSignature, MessageSigner, SignatureVerifier};
pub use engine::{AuthEngine, AuthEvent, AuthenticateResult, PendingAuthRequest};
pub use payload::{format_message, AuthPayload, AuthRequestParams};
pub use recap::{merge_urns, Recap};

use walletconnect_core::crypto::KeyError;
use walletconnect_core::history::HistoryError;
use walletconnect_core::pairing::PairingError;
use walletconnect_core::relay::RelayError;
use walletconnect_core::storage::StorageError;
use walletconnect_core::{Reason, WalletConnectError};

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Core(#[from] WalletConnectError),

    #[error("invalid auth payload: {0}")]
    InvalidPayload(String),

    #[error("invalid recap: {0}")]
    InvalidRecap(String),

    #[error("invalid cacao: {0}")]
    InvalidCacao(String),

    #[error("signature of {0} does not verify")]
    InvalidSignature(String),

    #[error("signing failed: {0}")]
    Signer(String),

    #[error("no auth request {0}")]
    NoRequest(String),

    #[error("auth request {0} expired")]
    RequestExpired(String),

    #[error("peer replied with error: {0}")]
    Peer(Reason),
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_retryable())
    }
}

macro_rules! via_core {
    ($($from:ty),*) => {$(
        impl From<$from> for AuthError {
            fn from(err: $from) -> Self {
                Self::Core(WalletConnectError::from(err))
            }
        }
    )*};
}

via_core!(StorageError, KeyError, PairingError, RelayError, HistoryError, serde_json::Error);
