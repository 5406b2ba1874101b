//! JSON-RPC 2.0 wire types as used between WalletConnect peers.
//!
//! Unlike plain JSON-RPC, request `params` must be an array or object; a bare
//! string, number, bool or null is rejected at decode time. A success `result`
//! may not be a bare string, number or bool either, so acknowledgements are
//! sent as `{}`.
//!
//! Replies from the relay itself (`irn_*` calls) do carry bare values and are
//! decoded as [`RelayResponse`] instead.

mod id;

pub use id::RpcId;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(-32602, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(-32603, detail)
    }
}

/// A request, or a notification when `id` is absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RequestRepr")]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    pub method: String,
    pub params: Value,
}

#[derive(Deserialize)]
struct RequestRepr {
    jsonrpc: String,
    #[serde(default)]
    id: Option<RpcId>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

impl TryFrom<RequestRepr> for RpcRequest {
    type Error = String;

    fn try_from(repr: RequestRepr) -> Result<Self, Self::Error> {
        if repr.jsonrpc != JSONRPC_VERSION {
            return Err(format!("unsupported jsonrpc version {}", repr.jsonrpc));
        }
        let params = repr.params.unwrap_or_else(|| Value::Object(Default::default()));
        if !(params.is_object() || params.is_array()) {
            return Err(format!("params of {} must be an array or object", repr.method));
        }
        Ok(Self {
            jsonrpc: repr.jsonrpc,
            id: repr.id,
            method: repr.method,
            params,
        })
    }
}

impl RpcRequest {
    /// New request with a freshly generated id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(RpcId::generate(), method, params)
    }

    pub fn with_id(id: RpcId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Request whose params are the serialization of `params`.
    pub fn from_params<P: Serialize>(
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(method, serde_json::to_value(params)?))
    }

    /// A request without id. Not tracked by the history ledger.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn params_as<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        P::deserialize(&self.params)
    }
}

/// Success value or error of a response.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcResult {
    Result(Value),
    Error(JsonRpcError),
}

/// A response, matched to its request by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseRepr", into = "ResponseRepr")]
pub struct RpcResponse {
    pub id: Option<RpcId>,
    pub outcome: RpcResult,
}

#[derive(Serialize, Deserialize)]
struct ResponseRepr {
    jsonrpc: String,
    id: Option<RpcId>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

// Keeps `"result": null` distinguishable from a missing result.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ResponseRepr {
    fn into_parts(self) -> Result<(Option<RpcId>, RpcResult), String> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(format!("unsupported jsonrpc version {}", self.jsonrpc));
        }
        let outcome = match (self.result, self.error) {
            (Some(result), None) => RpcResult::Result(result),
            (None, Some(error)) => RpcResult::Error(error),
            (Some(_), Some(_)) => return Err("response has both result and error".into()),
            (None, None) => return Err("response has neither result nor error".into()),
        };
        Ok((self.id, outcome))
    }

    fn from_parts(id: Option<RpcId>, outcome: RpcResult) -> Self {
        let (result, error) = match outcome {
            RpcResult::Result(value) => (Some(value), None),
            RpcResult::Error(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error,
        }
    }
}

fn is_bare_primitive(value: &Value) -> bool {
    value.is_string() || value.is_number() || value.is_boolean()
}

impl TryFrom<ResponseRepr> for RpcResponse {
    type Error = String;

    fn try_from(repr: ResponseRepr) -> Result<Self, Self::Error> {
        let (id, outcome) = repr.into_parts()?;
        let response = Self { id, outcome };
        response.check_shape()?;
        Ok(response)
    }
}

impl From<RpcResponse> for ResponseRepr {
    fn from(response: RpcResponse) -> Self {
        Self::from_parts(response.id, response.outcome)
    }
}

/// Reply to an `irn_*` call, or our acknowledgement of an `irn_subscription`.
///
/// Relay results are bare values (`true`, a subscription id) so no shape rule
/// applies here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseRepr", into = "ResponseRepr")]
pub struct RelayResponse {
    pub id: Option<RpcId>,
    pub outcome: RpcResult,
}

impl TryFrom<ResponseRepr> for RelayResponse {
    type Error = String;

    fn try_from(repr: ResponseRepr) -> Result<Self, Self::Error> {
        let (id, outcome) = repr.into_parts()?;
        Ok(Self { id, outcome })
    }
}

impl From<RelayResponse> for ResponseRepr {
    fn from(response: RelayResponse) -> Self {
        Self::from_parts(response.id, response.outcome)
    }
}

impl RelayResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: RpcResult::Result(result),
        }
    }

    pub fn error(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            id: Some(id),
            outcome: RpcResult::Error(error),
        }
    }
}

impl RpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: RpcResult::Result(result),
        }
    }

    pub fn error(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            id: Some(id),
            outcome: RpcResult::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, RpcResult::Error(_))
    }

    /// Peers never exchange a bare string, number or bool as `result`.
    pub fn check_shape(&self) -> Result<(), String> {
        match &self.outcome {
            RpcResult::Result(value) if is_bare_primitive(value) => {
                Err("result must not be a bare string, number or bool".into())
            }
            _ => Ok(()),
        }
    }

    /// Decode a success result as `T`. Error responses yield `Err(JsonRpcError)`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, JsonRpcError> {
        match &self.outcome {
            RpcResult::Result(value) => {
                T::deserialize(value).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            }
            RpcResult::Error(error) => Err(error.clone()),
        }
    }
}

/// A decoded inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcPayload {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl RpcPayload {
    /// Decode as a request first, then as a response.
    pub fn from_value(value: Value) -> Option<Self> {
        if value.get("method").is_some() {
            return serde_json::from_value(value).ok().map(Self::Request);
        }
        serde_json::from_value(value).ok().map(Self::Response)
    }
}

/// A decoded frame on the relay socket.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayPayload {
    Request(RpcRequest),
    Response(RelayResponse),
}

impl RelayPayload {
    pub fn from_value(value: Value) -> Option<Self> {
        if value.get("method").is_some() {
            return serde_json::from_value(value).ok().map(Self::Request);
        }
        serde_json::from_value(value).ok().map(Self::Response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_format() {
        let request = RpcRequest::with_id(RpcId::Number(1), "wc_sessionPing", json!({}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 1, "method": "wc_sessionPing", "params": {}})
        );
    }

    #[test]
    fn primitive_params_are_rejected() {
        for params in [json!("str"), json!(1), json!(true), json!(null)] {
            let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "m", "params": params});
            assert!(serde_json::from_value::<RpcRequest>(raw).is_err());
        }
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "m", "params": [1, 2]});
        assert!(serde_json::from_value::<RpcRequest>(raw).is_ok());
    }

    #[test]
    fn primitive_results_are_rejected() {
        for result in [json!(true), json!("0xsig"), json!(1)] {
            let raw = json!({"jsonrpc": "2.0", "id": 1, "result": result});
            assert!(serde_json::from_value::<RpcResponse>(raw.clone()).is_err());
            assert!(RpcPayload::from_value(raw).is_none());
        }
        for result in [json!({}), json!([true]), json!(null)] {
            let raw = json!({"jsonrpc": "2.0", "id": 1, "result": result});
            assert!(serde_json::from_value::<RpcResponse>(raw).is_ok());
        }
    }

    #[test]
    fn relay_replies_keep_bare_results() {
        let raw = json!({"jsonrpc": "2.0", "id": 9, "result": true});
        match RelayPayload::from_value(raw) {
            Some(RelayPayload::Response(reply)) => {
                assert_eq!(reply.outcome, RpcResult::Result(json!(true)));
            }
            other => panic!("unexpected {other:?}"),
        }
        let sub = json!({"jsonrpc": "2.0", "id": 10, "result": "sub-id"});
        assert!(serde_json::from_value::<RelayResponse>(sub).is_ok());
    }

    #[test]
    fn missing_params_default_to_object() {
        let raw = json!({"jsonrpc": "2.0", "id": "abc", "method": "m"});
        let request: RpcRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.params, json!({}));
        assert_eq!(request.id, Some(RpcId::String("abc".into())));
    }

    #[test]
    fn wrong_version_rejected() {
        let raw = json!({"jsonrpc": "1.0", "id": 1, "method": "m", "params": {}});
        assert!(serde_json::from_value::<RpcRequest>(raw).is_err());
    }

    #[test]
    fn response_success_and_error() {
        let ok = RpcResponse::success(RpcId::Number(5), json!({}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 5, "result": {}})
        );
        let err = RpcResponse::error(RpcId::Number(5), JsonRpcError::new(5000, "User rejected"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"]["code"], 5000);
        assert!(value.get("result").is_none());
        let back: RpcResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
        assert_eq!(back.result_as::<bool>().unwrap_err().code, 5000);
    }

    #[test]
    fn response_needs_exactly_one_outcome() {
        let both = json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}});
        assert!(serde_json::from_value::<RpcResponse>(both).is_err());
        let neither = json!({"jsonrpc": "2.0", "id": 1});
        assert!(serde_json::from_value::<RpcResponse>(neither).is_err());
    }

    #[test]
    fn payload_dispatch() {
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "m", "params": {}});
        assert!(matches!(RpcPayload::from_value(request), Some(RpcPayload::Request(_))));
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": 1}});
        assert!(matches!(RpcPayload::from_value(response), Some(RpcPayload::Response(_))));
        assert!(RpcPayload::from_value(json!({"hello": 1})).is_none());
    }
}
