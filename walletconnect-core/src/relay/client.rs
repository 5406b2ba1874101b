//! Relay protocol client.
//!
//! Every relay call is itself a JSON-RPC request over the socket. Calls that
//! need the relay's acknowledgement park a oneshot sender keyed by the call id;
//! the reader task completes it when the matching response frame arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::IrnMetadata;
use super::{RelayError, RelaySocket, SocketEvent};
use crate::rpc::{RelayPayload, RelayResponse, RpcId, RpcRequest, RpcResult};
use crate::Topic;

const IRN_PUBLISH: &str = "irn_publish";
const IRN_SUBSCRIBE: &str = "irn_subscribe";
const IRN_BATCH_SUBSCRIBE: &str = "irn_batchSubscribe";
const IRN_UNSUBSCRIBE: &str = "irn_unsubscribe";
const IRN_SUBSCRIPTION: &str = "irn_subscription";

/// A message the relay delivered on one of our topics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub topic: Topic,
    /// Envelope string as published by the peer.
    pub message: String,
    #[serde(default)]
    pub tag: u32,
    #[serde(default)]
    pub published_at: i64,
}

#[derive(Deserialize)]
struct SubscriptionParams {
    data: RelayMessage,
}

struct Inner {
    socket: Arc<dyn RelaySocket>,
    ack_timeout: Duration,
    pending: Mutex<HashMap<RpcId, oneshot::Sender<RelayResponse>>>,
    subscriptions: RwLock<HashMap<Topic, String>>,
    messages: broadcast::Sender<RelayMessage>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected_once: AtomicBool,
}

/// Client for the relay's `irn_*` protocol.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    pub fn new(socket: Arc<dyn RelaySocket>, ack_timeout: Duration, capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                socket,
                ack_timeout,
                pending: Mutex::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                messages,
                reader: Mutex::new(None),
                connected_once: AtomicBool::new(false),
            }),
        }
    }

    /// Start reading socket events (if not already) and connect the socket.
    pub async fn connect(&self) -> Result<(), RelayError> {
        self.ensure_reader()?;
        self.inner.socket.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), RelayError> {
        self.inner.socket.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.socket.is_connected()
    }

    /// Messages delivered on subscribed topics.
    pub fn messages(&self) -> broadcast::Receiver<RelayMessage> {
        self.inner.messages.subscribe()
    }

    /// Topics currently subscribed.
    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.inner
            .subscriptions
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.inner
            .subscriptions
            .read()
            .map(|s| s.contains_key(topic))
            .unwrap_or(false)
    }

    /// Publish without waiting for the relay's acknowledgement.
    pub async fn publish(
        &self,
        topic: &Topic,
        message: &str,
        metadata: IrnMetadata,
    ) -> Result<(), RelayError> {
        let request = RpcRequest::new(IRN_PUBLISH, publish_params(topic, message, metadata));
        self.send_frame(&request).await
    }

    /// Publish and wait until the relay acknowledges receipt.
    pub async fn publish_with_ack(
        &self,
        topic: &Topic,
        message: &str,
        metadata: IrnMetadata,
    ) -> Result<(), RelayError> {
        self.call(IRN_PUBLISH, publish_params(topic, message, metadata))
            .await
            .map(|_| ())
    }

    /// Subscribe to `topic`. Returns immediately if already subscribed.
    pub async fn subscribe(&self, topic: &Topic) -> Result<(), RelayError> {
        if self.is_subscribed(topic) {
            return Ok(());
        }
        let result = self.call(IRN_SUBSCRIBE, json!({ "topic": topic })).await?;
        let id = subscription_id(IRN_SUBSCRIBE, result)?;
        self.track(topic.clone(), id)?;
        debug!(%topic, "subscribed");
        Ok(())
    }

    /// Subscribe to several topics in one call.
    pub async fn batch_subscribe(&self, topics: &[Topic]) -> Result<(), RelayError> {
        let fresh: Vec<Topic> = topics
            .iter()
            .filter(|t| !self.is_subscribed(t))
            .cloned()
            .collect();
        self.batch_subscribe_all(&fresh).await
    }

    async fn batch_subscribe_all(&self, topics: &[Topic]) -> Result<(), RelayError> {
        if topics.is_empty() {
            return Ok(());
        }
        let result = self
            .call(IRN_BATCH_SUBSCRIBE, json!({ "topics": topics }))
            .await?;
        let ids: Vec<String> = serde_json::from_value(result)
            .map_err(|e| RelayError::Malformed(format!("{}: {}", IRN_BATCH_SUBSCRIBE, e)))?;
        if ids.len() != topics.len() {
            return Err(RelayError::Malformed(format!(
                "{}: expected {} subscription ids, got {}",
                IRN_BATCH_SUBSCRIBE,
                topics.len(),
                ids.len()
            )));
        }
        for (topic, id) in topics.iter().zip(ids) {
            self.track(topic.clone(), id)?;
        }
        debug!(count = topics.len(), "batch subscribed");
        Ok(())
    }

    /// Unsubscribe from `topic`. Unknown topics are ignored.
    ///
    /// The topic is untracked even if the relay call fails, so it is not
    /// restored on the next reconnect.
    pub async fn unsubscribe(&self, topic: &Topic) -> Result<(), RelayError> {
        let id = {
            let mut subs = self
                .inner
                .subscriptions
                .write()
                .map_err(|_| RelayError::Transport("subscription map poisoned".into()))?;
            match subs.remove(topic) {
                Some(id) => id,
                None => return Ok(()),
            }
        };
        self.call(IRN_UNSUBSCRIBE, json!({ "topic": topic, "id": id }))
            .await?;
        debug!(%topic, "unsubscribed");
        Ok(())
    }

    fn track(&self, topic: Topic, id: String) -> Result<(), RelayError> {
        let mut subs = self
            .inner
            .subscriptions
            .write()
            .map_err(|_| RelayError::Transport("subscription map poisoned".into()))?;
        subs.insert(topic, id);
        Ok(())
    }

    /// Send a relay call and wait for its result.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let (tx, rx) = oneshot::channel();
        let request = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .map_err(|_| RelayError::Transport("pending map poisoned".into()))?;
            let mut request = RpcRequest::new(method, params.clone());
            while request.id.as_ref().is_some_and(|id| pending.contains_key(id)) {
                request = RpcRequest::new(method, params.clone());
            }
            if let Some(id) = request.id.clone() {
                pending.insert(id, tx);
            }
            request
        };
        let id = request.id.clone();

        if let Err(e) = self.send_frame(&request).await {
            self.forget(id.as_ref());
            return Err(e);
        }

        let timeout_ms = self.inner.ack_timeout.as_millis() as u64;
        let response = match tokio::time::timeout(self.inner.ack_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(RelayError::NotConnected),
            Err(_) => {
                self.forget(id.as_ref());
                return Err(RelayError::Timeout {
                    method: method.to_string(),
                    timeout_ms,
                });
            }
        };

        match response.outcome {
            RpcResult::Result(value) => Ok(value),
            RpcResult::Error(error) => Err(RelayError::Rejected {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }),
        }
    }

    fn forget(&self, id: Option<&RpcId>) {
        if let (Some(id), Ok(mut pending)) = (id, self.inner.pending.lock()) {
            pending.remove(id);
        }
    }

    async fn send_frame<T: Serialize>(&self, frame: &T) -> Result<(), RelayError> {
        let text = serde_json::to_string(frame).map_err(|e| RelayError::Malformed(e.to_string()))?;
        self.inner.socket.send(text).await
    }

    fn ensure_reader(&self) -> Result<(), RelayError> {
        let mut reader = self
            .inner
            .reader
            .lock()
            .map_err(|_| RelayError::Transport("reader lock poisoned".into()))?;
        if reader.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let events = self.inner.socket.events();
        let weak = Arc::downgrade(&self.inner);
        *reader = Some(tokio::spawn(read_loop(weak, events)));
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

fn publish_params(topic: &Topic, message: &str, metadata: IrnMetadata) -> Value {
    json!({
        "topic": topic,
        "message": message,
        "ttl": metadata.ttl,
        "tag": metadata.tag,
        "prompt": metadata.prompt,
    })
}

fn subscription_id(method: &str, result: Value) -> Result<String, RelayError> {
    match result {
        Value::String(id) => Ok(id),
        other => Err(RelayError::Malformed(format!(
            "{}: expected subscription id, got {}",
            method, other
        ))),
    }
}

async fn read_loop(inner: Weak<Inner>, mut events: broadcast::Receiver<SocketEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "relay reader lagged, frames dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else { break };
        let client = RelayClient { inner };
        match event {
            SocketEvent::Message(text) => client.handle_frame(&text).await,
            SocketEvent::Connected => client.on_connected(),
            SocketEvent::Disconnected => client.on_disconnected(),
        }
    }
}

impl RelayClient {
    async fn handle_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "dropping non-JSON relay frame");
                return;
            }
        };
        match RelayPayload::from_value(value) {
            Some(RelayPayload::Request(request)) if request.method == IRN_SUBSCRIPTION => {
                self.handle_subscription(request).await
            }
            Some(RelayPayload::Request(request)) => {
                debug!(method = %request.method, "ignoring relay request");
            }
            Some(RelayPayload::Response(response)) => self.handle_ack(response),
            None => debug!("dropping unrecognized relay frame"),
        }
    }

    async fn handle_subscription(&self, request: RpcRequest) {
        if let Some(id) = request.id.clone() {
            let ack = RelayResponse::success(id, Value::Bool(true));
            if let Err(e) = self.send_frame(&ack).await {
                warn!(error = %e, "failed to acknowledge relay subscription message");
            }
        }
        match request.params_as::<SubscriptionParams>() {
            Ok(params) => {
                // No receivers is fine: nothing is listening yet.
                let _ = self.inner.messages.send(params.data);
            }
            Err(e) => debug!(error = %e, "malformed irn_subscription params"),
        }
    }

    fn handle_ack(&self, response: RelayResponse) {
        let Some(id) = response.id.clone() else {
            debug!("relay response without id");
            return;
        };
        let sender = self
            .inner
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&id));
        match sender {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => debug!(%id, "unsolicited relay ack"),
        }
    }

    fn on_connected(&self) {
        let reconnect = self.inner.connected_once.swap(true, Ordering::SeqCst);
        let topics = self.subscribed_topics();
        if topics.is_empty() {
            return;
        }
        info!(count = topics.len(), reconnect, "relay connected, restoring subscriptions");
        // Runs apart from the reader, which must stay free to deliver the acks.
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.batch_subscribe_all(&topics).await {
                warn!(error = %e, "re-subscription after reconnect failed");
            }
        });
    }

    fn on_disconnected(&self) {
        info!("relay disconnected");
        // Dropping the senders fails every waiting call with NotConnected.
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.clear();
        }
    }
}
