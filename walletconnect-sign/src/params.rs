//! Wire params of the `wc_session*` methods.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use walletconnect_core::{Blockchain, Participant, RelayProtocolOptions};

use crate::namespaces::{ProposalNamespaces, SessionNamespaces};

/// `wc_sessionPropose` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: ProposalNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_namespaces: Option<ProposalNamespaces>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<i64>,
}

/// `wc_sessionPropose` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeResponse {
    pub relay: RelayProtocolOptions,
    pub responder_public_key: String,
}

/// `wc_sessionSettle` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    pub relay: RelayProtocolOptions,
    pub controller: Participant,
    pub namespaces: SessionNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<BTreeMap<String, String>>,
    pub expiry: i64,
}

/// `wc_sessionUpdate` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: SessionNamespaces,
}

/// `wc_sessionExtend` params.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: i64,
}

/// The application request carried by `wc_sessionRequest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_timestamp: Option<i64>,
}

/// `wc_sessionRequest` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub request: Request,
    pub chain_id: Blockchain,
}

/// The application event carried by `wc_sessionEvent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub data: Value,
}

/// `wc_sessionEvent` params.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub event: Event,
    pub chain_id: Blockchain,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn propose_wire_names() {
        let params: SessionProposeParams = serde_json::from_value(json!({
            "relays": [{"protocol": "irn"}],
            "proposer": {
                "publicKey": "a3ad5e26070ddb2809200c6f56e739333512015bceeadbb8ea1731c4c7ddb207",
                "metadata": {"name": "dApp", "description": "", "url": "https://dapp.example", "icons": []}
            },
            "requiredNamespaces": {
                "eip155": {"chains": ["eip155:1"], "methods": ["eth_sendTransaction"], "events": []}
            }
        }))
        .unwrap();
        assert_eq!(params.relays[0].protocol, "irn");
        assert!(params.optional_namespaces.is_none());

        let back = serde_json::to_value(&params).unwrap();
        assert!(back.get("requiredNamespaces").is_some());
        assert!(back.get("optionalNamespaces").is_none());
    }

    #[test]
    fn request_wire_names() {
        let params = SessionRequestParams {
            request: Request {
                method: "personal_sign".into(),
                params: json!(["0xdeadbeef", "0xab16"]),
                expiry_timestamp: None,
            },
            chain_id: "eip155:1".parse().unwrap(),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["chainId"], "eip155:1");
        assert_eq!(json["request"]["method"], "personal_sign");
    }
}
