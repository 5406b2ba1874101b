//! Protocol reasons sent to peers in error responses and delete messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rpc::JsonRpcError;

/// A `{code, message}` pair understood by every WalletConnect peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i64,
    pub message: String,
}

impl Reason {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Same code with a more specific message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    // invalid (1xxx)
    pub fn invalid_method() -> Self {
        Self::new(1001, "Invalid method")
    }

    pub fn invalid_event() -> Self {
        Self::new(1002, "Invalid event")
    }

    pub fn invalid_update_request() -> Self {
        Self::new(1003, "Invalid update request")
    }

    pub fn invalid_extend_request() -> Self {
        Self::new(1004, "Invalid extend request")
    }

    pub fn invalid_session_settle_request() -> Self {
        Self::new(1005, "Invalid session settle request")
    }

    // unauthorized (3xxx)
    pub fn unauthorized_method() -> Self {
        Self::new(3001, "Unauthorized method")
    }

    pub fn unauthorized_event() -> Self {
        Self::new(3002, "Unauthorized event")
    }

    pub fn unauthorized_update_request() -> Self {
        Self::new(3003, "Unauthorized update request")
    }

    pub fn unauthorized_extend_request() -> Self {
        Self::new(3004, "Unauthorized extend request")
    }

    pub fn unauthorized_chain() -> Self {
        Self::new(3005, "Unauthorized chain")
    }

    // rejected (5xxx)
    pub fn user_rejected() -> Self {
        Self::new(5000, "User rejected")
    }

    pub fn unsupported_chains() -> Self {
        Self::new(5100, "Unsupported chains")
    }

    pub fn unsupported_methods() -> Self {
        Self::new(5101, "Unsupported methods")
    }

    pub fn unsupported_events() -> Self {
        Self::new(5102, "Unsupported events")
    }

    pub fn unsupported_accounts() -> Self {
        Self::new(5103, "Unsupported accounts")
    }

    pub fn unsupported_namespace_key() -> Self {
        Self::new(5104, "Unsupported namespace key")
    }

    // disconnect / expiry
    pub fn user_disconnected() -> Self {
        Self::new(6000, "User disconnected")
    }

    pub fn session_settlement_failed() -> Self {
        Self::new(7000, "Session settlement failed")
    }

    pub fn request_expired() -> Self {
        Self::new(8000, "Request expired")
    }

    pub fn wc_method_unsupported() -> Self {
        Self::new(10001, "Unsupported wc_ method")
    }

    // auth
    pub fn session_authenticate_rejected() -> Self {
        Self::new(12001, "User rejected session authentication")
    }

    pub fn malformed_request_params() -> Self {
        Self::new(12002, "Malformed request params")
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl From<Reason> for JsonRpcError {
    fn from(reason: Reason) -> Self {
        JsonRpcError::new(reason.code, reason.message)
    }
}

impl From<JsonRpcError> for Reason {
    fn from(err: JsonRpcError) -> Self {
        Reason::new(err.code, err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_roundtrips_through_rpc_error() {
        let reason = Reason::unsupported_chains().with_message("eip155:5 not approved");
        let err: JsonRpcError = reason.clone().into();
        assert_eq!(err.code, 5100);
        assert_eq!(Reason::from(err), reason);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(Reason::user_disconnected().to_string(), "User disconnected (6000)");
    }
}
