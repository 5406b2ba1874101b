//! Relay transport interactor.
//!
//! Outbound: record in the history ledger, seal with the envelope codec,
//! publish. Inbound: open, decode, deduplicate against the ledger, then fan
//! out on per-kind broadcast channels that engines filter by method.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::ProtocolMethod;
use super::{RelayClient, RelayError, RelayMessage};
use crate::envelope::{EnvelopeType, Serializer};
use crate::history::{Origin, RpcHistory};
use crate::reason::Reason;
use crate::rpc::{JsonRpcError, RpcId, RpcPayload, RpcRequest, RpcResponse};
use crate::{Result, Topic, WalletConnectError};

/// A peer request that passed decoding and duplicate checks.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub topic: Topic,
    pub request: RpcRequest,
    pub envelope: EnvelopeType,
    pub published_at: i64,
}

impl InboundRequest {
    pub fn id(&self) -> Option<&RpcId> {
        self.request.id.as_ref()
    }
}

/// A peer response together with the request it answers.
#[derive(Clone, Debug)]
pub struct InboundResponse {
    pub topic: Topic,
    pub request: RpcRequest,
    pub response: RpcResponse,
    pub envelope: EnvelopeType,
}

/// Anything routed by protocol method.
pub trait Routed: Clone {
    fn method(&self) -> &str;
}

impl Routed for InboundRequest {
    fn method(&self) -> &str {
        &self.request.method
    }
}

impl Routed for InboundResponse {
    fn method(&self) -> &str {
        &self.request.method
    }
}

/// Stream of inbound items restricted to a set of methods.
pub struct MethodStream<T> {
    rx: broadcast::Receiver<T>,
    methods: Vec<String>,
}

impl<T: Routed> MethodStream<T> {
    fn new(rx: broadcast::Receiver<T>, methods: &[&str]) -> Self {
        Self {
            rx,
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Next matching item, or `None` once the interactor is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) if self.methods.iter().any(|m| m == item.method()) => return Some(item),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, methods = ?self.methods, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct Inner {
    relay: RelayClient,
    serializer: Serializer,
    history: Arc<RpcHistory>,
    requests: broadcast::Sender<InboundRequest>,
    responses: broadcast::Sender<InboundResponse>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(handle) = dispatcher.take() {
                handle.abort();
            }
        }
    }
}

/// Semantic pub/sub over the relay.
#[derive(Clone)]
pub struct NetworkingInteractor {
    inner: Arc<Inner>,
}

impl NetworkingInteractor {
    pub fn new(
        relay: RelayClient,
        serializer: Serializer,
        history: Arc<RpcHistory>,
        capacity: usize,
    ) -> Self {
        let (requests, _) = broadcast::channel(capacity.max(1));
        let (responses, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                relay,
                serializer,
                history,
                requests,
                responses,
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn relay(&self) -> &RelayClient {
        &self.inner.relay
    }

    pub fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }

    pub fn history(&self) -> &Arc<RpcHistory> {
        &self.inner.history
    }

    /// Start dispatching relay messages. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut dispatcher = self
            .inner
            .dispatcher
            .lock()
            .map_err(|_| WalletConnectError::internal("dispatcher lock poisoned"))?;
        if dispatcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let mut messages = self.inner.relay.messages();
        let weak = Arc::downgrade(&self.inner);
        *dispatcher = Some(tokio::spawn(async move {
            loop {
                let message = match messages.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "interactor lagged behind relay");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                NetworkingInteractor { inner }.handle_message(message);
            }
        }));
        Ok(())
    }

    /// Peer requests for any of `methods`.
    pub fn request_subscription(&self, methods: &[&str]) -> MethodStream<InboundRequest> {
        MethodStream::new(self.inner.requests.subscribe(), methods)
    }

    /// Peer responses to our requests for any of `methods`.
    pub fn response_subscription(&self, methods: &[&str]) -> MethodStream<InboundResponse> {
        MethodStream::new(self.inner.responses.subscribe(), methods)
    }

    /// Every peer request, unfiltered.
    pub fn all_requests(&self) -> broadcast::Receiver<InboundRequest> {
        self.inner.requests.subscribe()
    }

    /// Every peer response, unfiltered.
    pub fn all_responses(&self) -> broadcast::Receiver<InboundResponse> {
        self.inner.responses.subscribe()
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        Ok(self.inner.relay.subscribe(topic).await?)
    }

    pub async fn batch_subscribe(&self, topics: &[Topic]) -> Result<()> {
        Ok(self.inner.relay.batch_subscribe(topics).await?)
    }

    /// Unsubscribe and drop the topic's history.
    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        let unsubscribed = self.inner.relay.unsubscribe(topic).await;
        self.inner.history.delete_all(std::slice::from_ref(topic))?;
        Ok(unsubscribed?)
    }

    /// Record `request` locally, then seal and publish it.
    pub async fn request(
        &self,
        request: &RpcRequest,
        topic: &Topic,
        envelope: &EnvelopeType,
    ) -> Result<()> {
        let message = self.prepare(request, topic, envelope)?;
        let metadata = ProtocolMethod::request_metadata(&request.method);
        self.inner.relay.publish(topic, &message, metadata).await?;
        Ok(())
    }

    /// Like [`request`](Self::request) but completes only once the relay acknowledged.
    pub async fn request_network_ack(
        &self,
        request: &RpcRequest,
        topic: &Topic,
        envelope: &EnvelopeType,
    ) -> Result<()> {
        let message = self.prepare(request, topic, envelope)?;
        let metadata = ProtocolMethod::request_metadata(&request.method);
        self.inner
            .relay
            .publish_with_ack(topic, &message, metadata)
            .await?;
        Ok(())
    }

    /// Send `request` and wait for the peer's response to it.
    ///
    /// The local history record stays pending if the wait times out.
    pub async fn request_and_await(
        &self,
        request: &RpcRequest,
        topic: &Topic,
        envelope: &EnvelopeType,
        timeout: Duration,
    ) -> Result<RpcResponse> {
        let id = request
            .id
            .clone()
            .ok_or(crate::history::HistoryError::UnidentifiedRequest)?;
        let mut responses = self.inner.responses.subscribe();
        self.request_network_ack(request, topic, envelope).await?;

        let wait = async {
            loop {
                match responses.recv().await {
                    Ok(inbound) if inbound.response.id.as_ref() == Some(&id) => {
                        return Ok(inbound.response)
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(WalletConnectError::from(RelayError::NotConnected))
                    }
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout {
                method: request.method.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    fn prepare(&self, request: &RpcRequest, topic: &Topic, envelope: &EnvelopeType) -> Result<String> {
        self.inner.history.set(request, topic, Origin::Local)?;
        let message = self.inner.serializer.serialize(topic, request, envelope)?;
        Ok(message)
    }

    /// Resolve the peer's request locally, then seal and publish the response.
    pub async fn respond(
        &self,
        topic: &Topic,
        response: &RpcResponse,
        envelope: &EnvelopeType,
    ) -> Result<()> {
        response
            .check_shape()
            .map_err(WalletConnectError::Serialization)?;
        let record = self.inner.history.resolve(response)?;
        let metadata = if response.is_error() {
            ProtocolMethod::reject_metadata(record.method())
        } else {
            ProtocolMethod::response_metadata(record.method())
        };
        let message = self.inner.serializer.serialize(topic, response, envelope)?;
        self.inner.relay.publish(topic, &message, metadata).await?;
        Ok(())
    }

    pub async fn respond_success<T: Serialize>(
        &self,
        topic: &Topic,
        id: &RpcId,
        result: &T,
        envelope: &EnvelopeType,
    ) -> Result<()> {
        let response = RpcResponse::success(id.clone(), serde_json::to_value(result)?);
        self.respond(topic, &response, envelope).await
    }

    /// Empty-object success, the protocol's plain acknowledgement.
    pub async fn respond_ack(&self, topic: &Topic, id: &RpcId, envelope: &EnvelopeType) -> Result<()> {
        let response = RpcResponse::success(id.clone(), Value::Object(Default::default()));
        self.respond(topic, &response, envelope).await
    }

    pub async fn respond_error(
        &self,
        topic: &Topic,
        id: &RpcId,
        reason: Reason,
        envelope: &EnvelopeType,
    ) -> Result<()> {
        let response = RpcResponse::error(id.clone(), JsonRpcError::from(reason));
        self.respond(topic, &response, envelope).await
    }

    fn handle_message(&self, message: RelayMessage) {
        let RelayMessage {
            topic,
            message,
            published_at,
            ..
        } = message;
        let (value, envelope) = match self.inner.serializer.deserialize::<Value>(&topic, &message) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(%topic, error = %e, "dropping undecodable message");
                return;
            }
        };
        match RpcPayload::from_value(value) {
            Some(RpcPayload::Request(request)) => {
                if let Err(e) = self.inner.history.set(&request, &topic, Origin::Remote) {
                    debug!(%topic, method = %request.method, error = %e, "dropping request");
                    return;
                }
                let _ = self.inner.requests.send(InboundRequest {
                    topic,
                    request,
                    envelope,
                    published_at,
                });
            }
            Some(RpcPayload::Response(response)) => match self.inner.history.resolve(&response) {
                Ok(record) => {
                    let _ = self.inner.responses.send(InboundResponse {
                        topic,
                        request: record.request,
                        response,
                        envelope,
                    });
                }
                Err(e) => debug!(%topic, error = %e, "dropping response"),
            },
            None => debug!(%topic, "dropping message that is neither request nor response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyManagementService, SymmetricKey};
    use crate::rpc::RpcResult;
    use crate::secure_storage::InMemoryKeyStorage;
    use crate::storage::InMemoryStorage;
    use crate::test_utils::InMemoryRelay;
    use serde_json::json;

    async fn peer(relay: &InMemoryRelay) -> NetworkingInteractor {
        let kms = KeyManagementService::new(Arc::new(InMemoryKeyStorage::new()));
        let client = RelayClient::new(Arc::new(relay.socket()), Duration::from_secs(2), 64);
        let history = Arc::new(RpcHistory::new(Arc::new(InMemoryStorage::new())));
        let interactor = NetworkingInteractor::new(client, Serializer::new(kms), history, 64);
        interactor.relay().connect().await.unwrap();
        interactor.start().unwrap();
        interactor
    }

    async fn shared_topic(a: &NetworkingInteractor, b: &NetworkingInteractor) -> Topic {
        let key = SymmetricKey::generate();
        let topic = key.derive_topic();
        for peer in [a, b] {
            peer.serializer().kms().set_symmetric_key(&key, &topic).unwrap();
            peer.subscribe(&topic).await.unwrap();
        }
        topic
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;

        let mut incoming = wallet.request_subscription(&["wc_sessionPing"]);
        let mut answers = dapp.response_subscription(&["wc_sessionPing"]);

        let request = RpcRequest::new("wc_sessionPing", json!({}));
        dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap();
        assert!(dapp.history().get(request.id.as_ref().unwrap()).unwrap().unwrap().is_pending());

        let inbound = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.request, request);
        wallet
            .respond_ack(&topic, inbound.id().unwrap(), &EnvelopeType::Type0)
            .await
            .unwrap();

        let answer = tokio::time::timeout(Duration::from_secs(2), answers.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer.request.id, request.id);
        assert_eq!(answer.response.outcome, RpcResult::Result(json!({})));
        assert!(!dapp.history().get(request.id.as_ref().unwrap()).unwrap().unwrap().is_pending());

        let tags: Vec<u32> = relay.published(&topic).iter().map(|m| m.tag).collect();
        assert_eq!(tags, vec![1114, 1115]);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_dropped() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;
        let mut incoming = wallet.request_subscription(&["wc_sessionRequest"]);

        let request = RpcRequest::new("wc_sessionRequest", json!({"request": {}}));
        dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap();
        assert!(incoming.recv().await.is_some());

        // The relay redelivers the same frame.
        relay.redeliver(&topic);
        assert!(
            tokio::time::timeout(Duration::from_millis(150), incoming.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_primitive_result_is_dropped_and_request_stays_pending() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;
        let mut incoming = wallet.request_subscription(&["wc_sessionPing"]);
        let mut answers = dapp.response_subscription(&["wc_sessionPing"]);

        let request = RpcRequest::new("wc_sessionPing", json!({}));
        dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap();
        let inbound = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
            .await
            .unwrap()
            .unwrap();

        // Refused before it reaches the wire.
        let bare = RpcResponse::success(inbound.id().unwrap().clone(), json!(true));
        let err = wallet.respond(&topic, &bare, &EnvelopeType::Type0).await.unwrap_err();
        assert!(matches!(err, WalletConnectError::Serialization(_)));
        assert!(wallet.history().get(inbound.id().unwrap()).unwrap().unwrap().is_pending());

        // A peer that sends one anyway is ignored.
        let raw = json!({"jsonrpc": "2.0", "id": request.id, "result": true});
        let sealed = wallet.serializer().serialize(&topic, &raw, &EnvelopeType::Type0).unwrap();
        wallet
            .relay()
            .publish(&topic, &sealed, crate::relay::protocol::DEFAULT_METADATA)
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(150), answers.recv())
                .await
                .is_err()
        );
        assert!(dapp.history().get(request.id.as_ref().unwrap()).unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_local_duplicate_request_rejected() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;

        let request = RpcRequest::new("wc_sessionPing", json!({}));
        dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap();
        let err = dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::RequestDuplicateNotAllowed);
    }

    #[tokio::test]
    async fn test_undecodable_traffic_is_ignored() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;
        let mut incoming = wallet.request_subscription(&["wc_sessionPing"]);

        dapp.relay()
            .publish(&topic, "bm90IGFuIGVudmVsb3Bl", crate::relay::protocol::DEFAULT_METADATA)
            .await
            .unwrap();
        let request = RpcRequest::new("wc_sessionPing", json!({}));
        dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.request.id, request.id);
    }

    #[tokio::test]
    async fn test_request_and_await_times_out_and_stays_pending() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;

        let request = RpcRequest::new("wc_sessionPing", json!({}));
        let err = dapp
            .request_and_await(&request, &topic, &EnvelopeType::Type0, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(dapp.history().get(request.id.as_ref().unwrap()).unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_unsubscribe_clears_history() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay).await;
        let wallet = peer(&relay).await;
        let topic = shared_topic(&dapp, &wallet).await;

        let request = RpcRequest::new("wc_sessionPing", json!({}));
        dapp.request(&request, &topic, &EnvelopeType::Type0).await.unwrap();
        dapp.unsubscribe(&topic).await.unwrap();
        assert!(dapp.history().get(request.id.as_ref().unwrap()).unwrap().is_none());
    }
}
