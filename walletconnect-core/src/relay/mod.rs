//! Relay transport.
//!
//! [`RelayClient`] speaks the relay's own JSON-RPC protocol (`irn_*`) over an
//! injected [`RelaySocket`]. [`NetworkingInteractor`] sits on top and turns
//! topic messages into decrypted, deduplicated peer requests and responses.

mod client;
mod interactor;
pub mod protocol;
mod socket;

pub use client::{RelayClient, RelayMessage};
pub use interactor::{InboundRequest, InboundResponse, MethodStream, NetworkingInteractor, Routed};
pub use protocol::{IrnMetadata, ProtocolMethod};
pub use socket::{RelaySocket, SocketEvent};

/// Errors talking to the relay.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("relay socket is not connected")]
    NotConnected,

    #[error("relay transport error: {0}")]
    Transport(String),

    #[error("relay did not acknowledge {method} within {timeout_ms} ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("relay rejected {method}: {message} ({code})")]
    Rejected {
        method: String,
        code: i64,
        message: String,
    },

    #[error("malformed relay frame: {0}")]
    Malformed(String),
}
