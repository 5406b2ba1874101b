//! Protocol method table.
//!
//! Each WalletConnect method publishes its request and response with fixed
//! relay metadata. The tag lets the relay (and push servers) tell message
//! kinds apart without decrypting; the core never interprets it.

use serde::{Deserialize, Serialize};

use crate::config::DAY;

/// Relay metadata attached to `irn_publish`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrnMetadata {
    pub tag: u32,
    /// Seconds the relay keeps the message for an offline subscriber.
    pub ttl: u64,
    pub prompt: bool,
}

impl IrnMetadata {
    pub const fn new(tag: u32, ttl: u64, prompt: bool) -> Self {
        Self { tag, ttl, prompt }
    }
}

/// Metadata used for methods outside the table.
pub const DEFAULT_METADATA: IrnMetadata = IrnMetadata::new(0, 300, false);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolMethod {
    pub method: &'static str,
    pub request: IrnMetadata,
    pub response: IrnMetadata,
    /// Tag for error responses, when it differs from the response tag.
    pub reject_tag: Option<u32>,
}

const ONE_DAY: u64 = DAY as u64;
const FIVE_MINUTES: u64 = 300;
const THIRTY_SECONDS: u64 = 30;
const ONE_HOUR: u64 = 3600;

const fn method(
    method: &'static str,
    request_tag: u32,
    ttl: u64,
    prompt: bool,
) -> ProtocolMethod {
    ProtocolMethod {
        method,
        request: IrnMetadata::new(request_tag, ttl, prompt),
        response: IrnMetadata::new(request_tag + 1, ttl, false),
        reject_tag: None,
    }
}

pub const PAIRING_DELETE: ProtocolMethod = method("wc_pairingDelete", 1000, ONE_DAY, false);
pub const PAIRING_PING: ProtocolMethod = method("wc_pairingPing", 1002, THIRTY_SECONDS, false);
pub const PAIRING_EXTEND: ProtocolMethod = method("wc_pairingExtend", 1004, ONE_DAY, false);

pub const SESSION_PROPOSE: ProtocolMethod = method("wc_sessionPropose", 1100, FIVE_MINUTES, true);
pub const SESSION_SETTLE: ProtocolMethod = method("wc_sessionSettle", 1102, FIVE_MINUTES, false);
pub const SESSION_UPDATE: ProtocolMethod = method("wc_sessionUpdate", 1104, ONE_DAY, false);
pub const SESSION_EXTEND: ProtocolMethod = method("wc_sessionExtend", 1106, ONE_DAY, false);
pub const SESSION_REQUEST: ProtocolMethod = method("wc_sessionRequest", 1108, FIVE_MINUTES, true);
pub const SESSION_EVENT: ProtocolMethod = method("wc_sessionEvent", 1110, FIVE_MINUTES, true);
pub const SESSION_DELETE: ProtocolMethod = method("wc_sessionDelete", 1112, ONE_DAY, false);
pub const SESSION_PING: ProtocolMethod = method("wc_sessionPing", 1114, THIRTY_SECONDS, false);
pub const SESSION_AUTHENTICATE: ProtocolMethod = ProtocolMethod {
    reject_tag: Some(1118),
    ..method("wc_sessionAuthenticate", 1116, ONE_HOUR, true)
};

/// Methods served on pairing topics by the pairing engine itself.
pub const PAIRING_METHODS: [&str; 3] = [
    PAIRING_DELETE.method,
    PAIRING_PING.method,
    PAIRING_EXTEND.method,
];

const ALL: [ProtocolMethod; 12] = [
    PAIRING_DELETE,
    PAIRING_PING,
    PAIRING_EXTEND,
    SESSION_PROPOSE,
    SESSION_SETTLE,
    SESSION_UPDATE,
    SESSION_EXTEND,
    SESSION_REQUEST,
    SESSION_EVENT,
    SESSION_DELETE,
    SESSION_PING,
    SESSION_AUTHENTICATE,
];

impl ProtocolMethod {
    pub fn lookup(name: &str) -> Option<&'static ProtocolMethod> {
        ALL.iter().find(|m| m.method == name)
    }

    pub fn request_metadata(name: &str) -> IrnMetadata {
        Self::lookup(name).map_or(DEFAULT_METADATA, |m| m.request)
    }

    pub fn response_metadata(name: &str) -> IrnMetadata {
        Self::lookup(name).map_or(DEFAULT_METADATA, |m| m.response)
    }

    pub fn reject_metadata(name: &str) -> IrnMetadata {
        match Self::lookup(name) {
            Some(m) => IrnMetadata {
                tag: m.reject_tag.unwrap_or(m.response.tag),
                ..m.response
            },
            None => DEFAULT_METADATA,
        }
    }
}
