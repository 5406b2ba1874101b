//! Error types for WalletConnect core operations.
//!
//! Each component has its own error enum; [`WalletConnectError`] wraps them all
//! and adds a stable numeric [`ErrorCode`] for bindings and logging.

use crate::caip::CaipError;
use crate::crypto::KeyError;
use crate::envelope::CodecError;
use crate::history::HistoryError;
use crate::pairing::PairingError;
use crate::relay::RelayError;
use crate::storage::StorageError;

/// Stable numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Malformed input (topic, URI, CAIP id)
    InvalidInput = 1000,
    /// Invalid CAIP identifier
    InvalidCaip = 1001,
    /// Malformed pairing URI
    MalformedPairingUri = 1002,
    /// Key material missing
    KeyNotFound = 2000,
    /// Cryptographic failure
    Crypto = 2001,
    /// Envelope encode/decode failure
    Codec = 2002,
    /// Request without id
    UnidentifiedRequest = 3000,
    /// Request id already recorded
    RequestDuplicateNotAllowed = 3001,
    /// Response without id
    UnidentifiedResponse = 3002,
    /// No pending request for response
    RequestMatchingResponseNotFound = 3003,
    /// Response already recorded
    ResponseDuplicateNotAllowed = 3004,
    /// Relay transport failure
    Transport = 4000,
    /// Relay did not acknowledge in time
    Timeout = 4001,
    /// Relay rejected the call
    RelayRejected = 4002,
    /// Pairing already known
    PairingAlreadyExists = 5000,
    /// Pairing not found
    NoPairing = 5001,
    /// Expiry update out of bounds
    InvalidUpdateExpiryValue = 5002,
    /// Method not supported by the pairing
    MethodUnsupported = 5003,
    /// Peer answered with an error
    Peer = 5004,
    /// Storage failure
    Storage = 7000,
    /// Serialization failure
    Serialization = 7001,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Umbrella error for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum WalletConnectError {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error(transparent)]
    Caip(#[from] CaipError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletConnectError {
    /// Numeric code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTopic(_) => ErrorCode::InvalidInput,
            Self::Caip(_) => ErrorCode::InvalidCaip,
            Self::Key(KeyError::KeyNotFound(_)) => ErrorCode::KeyNotFound,
            Self::Key(KeyError::Storage(_)) => ErrorCode::Storage,
            Self::Key(_) => ErrorCode::Crypto,
            Self::Codec(CodecError::Key(KeyError::KeyNotFound(_))) => ErrorCode::KeyNotFound,
            Self::Codec(_) => ErrorCode::Codec,
            Self::History(e) => match e {
                HistoryError::UnidentifiedRequest => ErrorCode::UnidentifiedRequest,
                HistoryError::RequestDuplicateNotAllowed(_) => {
                    ErrorCode::RequestDuplicateNotAllowed
                }
                HistoryError::UnidentifiedResponse => ErrorCode::UnidentifiedResponse,
                HistoryError::RequestMatchingResponseNotFound(_) => {
                    ErrorCode::RequestMatchingResponseNotFound
                }
                HistoryError::ResponseDuplicateNotAllowed(_) => {
                    ErrorCode::ResponseDuplicateNotAllowed
                }
                HistoryError::Storage(_) => ErrorCode::Storage,
            },
            Self::Relay(RelayError::Timeout { .. }) => ErrorCode::Timeout,
            Self::Relay(RelayError::Rejected { .. }) => ErrorCode::RelayRejected,
            Self::Relay(_) => ErrorCode::Transport,
            Self::Pairing(e) => match e {
                PairingError::MalformedPairingUri(_) => ErrorCode::MalformedPairingUri,
                PairingError::PairingAlreadyExists(_) => ErrorCode::PairingAlreadyExists,
                PairingError::NoPairing(_) => ErrorCode::NoPairing,
                PairingError::InvalidUpdateExpiryValue => ErrorCode::InvalidUpdateExpiryValue,
                PairingError::MethodUnsupported(_) => ErrorCode::MethodUnsupported,
                PairingError::Peer(_) => ErrorCode::Peer,
            },
            Self::Storage(_) => ErrorCode::Storage,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the operation may succeed if retried unchanged.
    ///
    /// Only transport failures qualify. Retrying a request with the same id is
    /// always rejected by the history ledger.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Relay(RelayError::Timeout { .. })
                | Self::Relay(RelayError::NotConnected)
                | Self::Relay(RelayError::Transport(_))
        )
    }

    /// Shorthand for an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for WalletConnectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcId;

    #[test]
    fn test_error_codes() {
        let err = WalletConnectError::from(HistoryError::RequestDuplicateNotAllowed(RpcId::Number(
            1,
        )));
        assert_eq!(err.code(), ErrorCode::RequestDuplicateNotAllowed);
        assert_eq!(err.code() as i32, 3001);

        let err = WalletConnectError::from(PairingError::InvalidUpdateExpiryValue);
        assert_eq!(err.code(), ErrorCode::InvalidUpdateExpiryValue);

        let err = WalletConnectError::from(KeyError::KeyNotFound("abc".into()));
        assert_eq!(err.code(), ErrorCode::KeyNotFound);
    }

    #[test]
    fn test_retryable() {
        assert!(WalletConnectError::from(RelayError::Timeout {
            method: "irn_publish".into(),
            timeout_ms: 10
        })
        .is_retryable());
        assert!(!WalletConnectError::from(HistoryError::UnidentifiedRequest).is_retryable());
        assert!(!WalletConnectError::InvalidTopic("x".into()).is_retryable());
    }

    #[test]
    fn test_display_is_transparent() {
        let err = WalletConnectError::from(PairingError::PairingAlreadyExists("t".into()));
        assert_eq!(err.to_string(), "pairing already exists: t");
    }

    #[test]
    fn test_from_serde() {
        let err: WalletConnectError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::Serialization);
    }
}
