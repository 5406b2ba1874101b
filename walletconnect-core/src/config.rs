//! Configuration and protocol time-to-live constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AppMetadata;

/// Relay protocol used by the public WalletConnect relay.
pub const DEFAULT_RELAY_PROTOCOL: &str = "irn";

/// Seconds in one day.
pub const DAY: i64 = 86_400;

/// Lifetime of a pairing nobody has used yet.
pub const INACTIVE_PAIRING_TTL: i64 = 5 * 60;

/// Lifetime (and renewal ceiling) of an active pairing.
pub const ACTIVE_PAIRING_TTL: i64 = 30 * DAY;

/// Lifetime (and renewal ceiling) of a session.
pub const SESSION_TTL: i64 = 7 * DAY;

/// Lifetime of an unanswered session proposal.
pub const PROPOSAL_TTL: i64 = 5 * 60;

/// Lifetime of an unanswered authentication request.
pub const AUTH_REQUEST_TTL: i64 = 60 * 60;

/// Core configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Metadata announced to peers.
    pub metadata: AppMetadata,

    /// Relay protocol name put in URIs, proposals and settlements.
    #[serde(default = "default_relay_protocol")]
    pub relay_protocol: String,

    /// How long to wait for the relay to acknowledge a call, in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub relay_ack_timeout_ms: u64,

    /// Interval of the background expiry sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub expiry_sweep_interval_secs: u64,

    /// Capacity of the event broadcast channels.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_relay_protocol() -> String {
    DEFAULT_RELAY_PROTOCOL.to_string()
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    256
}

impl CoreConfig {
    /// Create a configuration with default relay settings.
    pub fn new(metadata: AppMetadata) -> Self {
        Self {
            metadata,
            relay_protocol: default_relay_protocol(),
            relay_ack_timeout_ms: default_ack_timeout_ms(),
            expiry_sweep_interval_secs: default_sweep_interval(),
            event_channel_capacity: default_event_capacity(),
        }
    }

    /// Set the relay protocol name.
    pub fn with_relay_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.relay_protocol = protocol.into();
        self
    }

    /// Set the relay ack timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.relay_ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the expiry sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval_secs = interval.as_secs().max(1);
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_ack_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let json = r#"{"metadata":{"name":"w","description":"","url":"https://w.io"}}"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.relay_protocol, "irn");
        assert_eq!(config.ack_timeout(), Duration::from_secs(10));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn builders_override() {
        let config = CoreConfig::new(AppMetadata::new("d", "https://d.io"))
            .with_relay_protocol("waku")
            .with_ack_timeout(Duration::from_millis(250))
            .with_sweep_interval(Duration::from_millis(10));
        assert_eq!(config.relay_protocol, "waku");
        assert_eq!(config.relay_ack_timeout_ms, 250);
        assert_eq!(config.expiry_sweep_interval_secs, 1);
    }
}
