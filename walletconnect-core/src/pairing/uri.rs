//! Pairing URI.
//!
//! Format:
//!
//! ```text
//! wc:{topic}@2?symKey={hex}&relay-protocol={proto}[&relay-data={data}][&methods={csv}][&expiryTimestamp={unix}]
//! ```
//!
//! Values are percent-encoded. Unknown query parameters are ignored so newer
//! URIs still pair.

use std::fmt;
use std::str::FromStr;

use super::PairingError;
use crate::crypto::SymmetricKey;
use crate::{RelayProtocolOptions, Topic};

pub const URI_SCHEME: &str = "wc:";
pub const PROTOCOL_VERSION: &str = "2";

/// A parsed or generated pairing URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConnectUri {
    pub topic: Topic,
    pub version: String,
    pub sym_key: SymmetricKey,
    pub relay: RelayProtocolOptions,
    /// Request methods the creator expects on the pairing.
    ///
    /// Entries are kept verbatim. Names containing `,` and a list holding a
    /// single empty name do not survive a round trip.
    pub methods: Option<Vec<String>>,
    pub expiry_timestamp: Option<i64>,
}

impl WalletConnectUri {
    pub fn new(topic: Topic, sym_key: SymmetricKey, relay: RelayProtocolOptions) -> Self {
        Self {
            topic,
            version: PROTOCOL_VERSION.to_string(),
            sym_key,
            relay,
            methods: None,
            expiry_timestamp: None,
        }
    }

    pub fn with_methods(mut self, methods: Vec<String>) -> Self {
        self.methods = Some(methods);
        self
    }

    pub fn with_expiry(mut self, expiry: i64) -> Self {
        self.expiry_timestamp = Some(expiry);
        self
    }

    /// Parse a URI string.
    pub fn parse(uri: &str) -> Result<Self, PairingError> {
        let malformed = |reason: &str| PairingError::MalformedPairingUri(reason.to_string());

        let uri = uri.trim();
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| malformed("missing wc: scheme"))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| malformed("missing query"))?;
        let (topic, version) = path
            .split_once('@')
            .ok_or_else(|| malformed("missing version"))?;
        if version != PROTOCOL_VERSION {
            return Err(malformed("unsupported version"));
        }
        let topic = Topic::from_str(topic).map_err(|_| malformed("invalid topic"))?;

        let mut sym_key = None;
        let mut protocol = None;
        let mut relay_data = None;
        let mut methods = None;
        let mut expiry_timestamp = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(value)
                .map_err(|_| malformed("invalid percent-encoding"))?
                .into_owned();
            match key {
                "symKey" => {
                    sym_key = Some(SymmetricKey::from_hex(&value).map_err(|_| malformed("invalid symKey"))?)
                }
                "relay-protocol" => protocol = Some(value),
                "relay-data" => relay_data = Some(value),
                "methods" if value.is_empty() => methods = Some(Vec::new()),
                "methods" => methods = Some(value.split(',').map(String::from).collect()),
                "expiryTimestamp" => {
                    expiry_timestamp =
                        Some(value.parse().map_err(|_| malformed("invalid expiryTimestamp"))?)
                }
                _ => {}
            }
        }

        let protocol = protocol
            .filter(|p| !p.is_empty())
            .ok_or_else(|| malformed("missing relay-protocol"))?;

        Ok(Self {
            topic,
            version: version.to_string(),
            sym_key: sym_key.ok_or_else(|| malformed("missing symKey"))?,
            relay: RelayProtocolOptions {
                protocol,
                data: relay_data,
            },
            methods,
            expiry_timestamp,
        })
    }
}

impl FromStr for WalletConnectUri {
    type Err = PairingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WalletConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}@{}?symKey={}&relay-protocol={}",
            URI_SCHEME,
            self.topic,
            self.version,
            self.sym_key.to_hex(),
            urlencoding::encode(&self.relay.protocol)
        )?;
        if let Some(data) = &self.relay.data {
            write!(f, "&relay-data={}", urlencoding::encode(data))?;
        }
        if let Some(methods) = &self.methods {
            write!(f, "&methods={}", urlencoding::encode(&methods.join(",")))?;
        }
        if let Some(expiry) = self.expiry_timestamp {
            write!(f, "&expiryTimestamp={}", expiry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WalletConnectUri {
        WalletConnectUri::new(
            Topic::generate(),
            SymmetricKey::generate(),
            RelayProtocolOptions::new("irn"),
        )
    }

    #[test]
    fn test_roundtrip_minimal() {
        let uri = sample();
        let text = uri.to_string();
        assert!(text.starts_with("wc:"));
        assert!(text.contains("@2?symKey="));
        assert_eq!(WalletConnectUri::parse(&text).unwrap(), uri);
    }

    #[test]
    fn test_roundtrip_full() {
        let uri = WalletConnectUri {
            relay: RelayProtocolOptions {
                protocol: "irn".into(),
                data: Some("a b&c=d".into()),
            },
            ..sample()
        }
        .with_methods(vec!["wc_sessionPropose".into(), "wc_sessionAuthenticate".into()])
        .with_expiry(1_700_000_000);
        let parsed: WalletConnectUri = uri.to_string().parse().unwrap();
        assert_eq!(parsed, uri);
    }

    #[test]
    fn test_methods_kept_verbatim() {
        let text = format!("{}&methods=%20wc_sessionPropose%2C%2Cwc_sessionAuthenticate%20", sample());
        let uri = WalletConnectUri::parse(&text).unwrap();
        assert_eq!(
            uri.methods.as_deref().unwrap(),
            [" wc_sessionPropose", "", "wc_sessionAuthenticate "]
        );
        assert_eq!(uri.to_string(), text);

        let empty = sample().with_methods(Vec::new());
        assert_eq!(WalletConnectUri::parse(&empty.to_string()).unwrap(), empty);
    }

    proptest::proptest! {
        #[test]
        fn test_methods_roundtrip(methods in proptest::collection::vec("[^,]{1,12}", 1..5)) {
            let uri = sample().with_methods(methods);
            proptest::prop_assert_eq!(WalletConnectUri::parse(&uri.to_string()).unwrap(), uri);
        }
    }

    #[test]
    fn test_known_vector() {
        let text = "wc:7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9@2?relay-protocol=irn&symKey=587d5484ce2a2a6ee3ba1962fdd7e8588e06200c46823bd18fbd67def96ad303";
        let uri = WalletConnectUri::parse(text).unwrap();
        assert_eq!(
            uri.topic.as_str(),
            "7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9"
        );
        assert_eq!(uri.relay.protocol, "irn");
        assert!(uri.methods.is_none());
    }

    #[test]
    fn test_malformed() {
        let good = sample().to_string();
        let cases = [
            "".to_string(),
            good.replacen("wc:", "wx:", 1),
            good.replacen("@2", "@1", 1),
            good.replacen("@2", "", 1),
            good.replacen("symKey=", "symKey=zz", 1),
            good.replace("&relay-protocol=irn", ""),
            good.split('?').next().unwrap().to_string(),
            format!("wc:abc@2?symKey={}&relay-protocol=irn", "00".repeat(32)),
        ];
        for case in cases {
            assert!(
                matches!(WalletConnectUri::parse(&case), Err(PairingError::MalformedPairingUri(_))),
                "{case}"
            );
        }
    }

    #[test]
    fn test_unknown_params_ignored() {
        let uri = sample();
        let text = format!("{}&future=1", uri);
        assert_eq!(WalletConnectUri::parse(&text).unwrap(), uri);
    }
}
