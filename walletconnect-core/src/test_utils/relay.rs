//! In-memory relay server.
//!
//! Implements the relay side of the `irn_*` protocol for any number of
//! [`InMemorySocket`]s: acknowledges calls, fans published messages out to the
//! other subscribers of a topic, keeps a mailbox per topic that is replayed on
//! subscribe, and can drop a connection to exercise reconnect handling.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::relay::{RelayError, RelayMessage, RelaySocket, SocketEvent};
use crate::rpc::{RelayPayload, RelayResponse, RpcId, RpcRequest};
use crate::Topic;

const SOCKET_CAPACITY: usize = 1024;

struct Stored {
    message: RelayMessage,
    publisher: u64,
}

struct Connection {
    events: broadcast::Sender<SocketEvent>,
    connected: bool,
    subscriptions: HashSet<Topic>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    connections: HashMap<u64, Connection>,
    mailbox: HashMap<Topic, Vec<Stored>>,
    acks_disabled: bool,
}

impl State {
    fn emit(&self, conn: u64, event: SocketEvent) {
        if let Some(c) = self.connections.get(&conn) {
            let _ = c.events.send(event);
        }
    }

    fn deliver(&self, conn: u64, message: &RelayMessage) {
        let frame = RpcRequest::new(
            "irn_subscription",
            json!({ "id": format!("sub-{}", message.topic), "data": message }),
        );
        if let Ok(text) = serde_json::to_string(&frame) {
            self.emit(conn, SocketEvent::Message(text));
        }
    }

    fn ack(&self, conn: u64, id: RpcId, result: Value) {
        if self.acks_disabled {
            return;
        }
        if let Ok(text) = serde_json::to_string(&RelayResponse::success(id, result)) {
            self.emit(conn, SocketEvent::Message(text));
        }
    }

    fn subscribe(&mut self, conn: u64, topic: &Topic) -> String {
        if let Some(c) = self.connections.get_mut(&conn) {
            c.subscriptions.insert(topic.clone());
        }
        format!("{:016x}{}", conn, &topic.as_str()[..16])
    }

    fn replay(&self, conn: u64, topic: &Topic) {
        if let Some(stored) = self.mailbox.get(topic) {
            for s in stored.iter().filter(|s| s.publisher != conn) {
                self.deliver(conn, &s.message);
            }
        }
    }
}

#[derive(Deserialize)]
struct PublishParams {
    topic: Topic,
    message: String,
    #[serde(default)]
    tag: u32,
}

#[derive(Deserialize)]
struct TopicParams {
    topic: Topic,
}

#[derive(Deserialize)]
struct BatchParams {
    topics: Vec<Topic>,
}

/// Shared in-memory relay hub.
#[derive(Clone, Default)]
pub struct InMemoryRelay {
    state: Arc<Mutex<State>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic in a test thread must not hide the original failure behind
    // poisoning errors everywhere else.
    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A new, not yet connected socket on this relay.
    pub fn socket(&self) -> InMemorySocket {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        let (events, _) = broadcast::channel(SOCKET_CAPACITY);
        state.connections.insert(
            id,
            Connection {
                events: events.clone(),
                connected: false,
                subscriptions: HashSet::new(),
            },
        );
        InMemorySocket {
            id,
            relay: self.clone(),
            events,
        }
    }

    /// Stop acknowledging relay calls (to test ack timeouts).
    pub fn set_acks_enabled(&self, enabled: bool) {
        self.state().acks_disabled = !enabled;
    }

    /// Drop `socket`'s connection: the relay forgets its subscriptions.
    pub fn drop_connection(&self, socket: &InMemorySocket) {
        let mut state = self.state();
        if let Some(c) = state.connections.get_mut(&socket.id) {
            c.connected = false;
            c.subscriptions.clear();
        }
        state.emit(socket.id, SocketEvent::Disconnected);
    }

    /// Messages published on `topic` so far.
    pub fn published(&self, topic: &Topic) -> Vec<RelayMessage> {
        self.state()
            .mailbox
            .get(topic)
            .map(|stored| stored.iter().map(|s| s.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of connections subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.state()
            .connections
            .values()
            .filter(|c| c.connected && c.subscriptions.contains(topic))
            .count()
    }

    /// Deliver every stored message on `topic` again, as a relay would after
    /// a missed acknowledgement.
    pub fn redeliver(&self, topic: &Topic) {
        let state = self.state();
        let subscribers: Vec<u64> = state
            .connections
            .iter()
            .filter(|(_, c)| c.connected && c.subscriptions.contains(topic))
            .map(|(id, _)| *id)
            .collect();
        for conn in subscribers {
            state.replay(conn, topic);
        }
    }

    fn set_connected(&self, conn: u64, connected: bool) {
        let mut state = self.state();
        if let Some(c) = state.connections.get_mut(&conn) {
            c.connected = connected;
            if !connected {
                c.subscriptions.clear();
            }
        }
        let event = if connected {
            SocketEvent::Connected
        } else {
            SocketEvent::Disconnected
        };
        state.emit(conn, event);
    }

    fn is_connected(&self, conn: u64) -> bool {
        self.state()
            .connections
            .get(&conn)
            .is_some_and(|c| c.connected)
    }

    fn handle(&self, conn: u64, text: &str) -> Result<(), RelayError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RelayError::Malformed(e.to_string()))?;
        let request = match RelayPayload::from_value(value) {
            Some(RelayPayload::Request(request)) => request,
            // acknowledgements of irn_subscription deliveries
            Some(RelayPayload::Response(_)) => return Ok(()),
            None => return Err(RelayError::Malformed(text.to_string())),
        };
        let Some(id) = request.id.clone() else {
            return Ok(());
        };
        let malformed = |e: serde_json::Error| RelayError::Malformed(e.to_string());

        let mut state = self.state();
        match request.method.as_str() {
            "irn_publish" => {
                let params: PublishParams = request.params_as().map_err(malformed)?;
                let message = RelayMessage {
                    topic: params.topic.clone(),
                    message: params.message,
                    tag: params.tag,
                    published_at: chrono::Utc::now().timestamp_millis(),
                };
                let subscribers: Vec<u64> = state
                    .connections
                    .iter()
                    .filter(|(other, c)| {
                        **other != conn && c.connected && c.subscriptions.contains(&params.topic)
                    })
                    .map(|(other, _)| *other)
                    .collect();
                state.ack(conn, id, Value::Bool(true));
                for other in subscribers {
                    state.deliver(other, &message);
                }
                state.mailbox.entry(params.topic).or_default().push(Stored {
                    message,
                    publisher: conn,
                });
            }
            "irn_subscribe" => {
                let params: TopicParams = request.params_as().map_err(malformed)?;
                let sub_id = state.subscribe(conn, &params.topic);
                state.ack(conn, id, Value::String(sub_id));
                state.replay(conn, &params.topic);
            }
            "irn_batchSubscribe" => {
                let params: BatchParams = request.params_as().map_err(malformed)?;
                let ids: Vec<String> = params
                    .topics
                    .iter()
                    .map(|t| state.subscribe(conn, t))
                    .collect();
                state.ack(conn, id, json!(ids));
                for topic in &params.topics {
                    state.replay(conn, topic);
                }
            }
            "irn_unsubscribe" => {
                let params: TopicParams = request.params_as().map_err(malformed)?;
                if let Some(c) = state.connections.get_mut(&conn) {
                    c.subscriptions.remove(&params.topic);
                }
                state.ack(conn, id, Value::Bool(true));
            }
            other => {
                let error = crate::rpc::JsonRpcError::new(-32601, format!("unknown method {}", other));
                if let Ok(text) = serde_json::to_string(&RelayResponse::error(id, error)) {
                    state.emit(conn, SocketEvent::Message(text));
                }
            }
        }
        Ok(())
    }
}

/// One client connection to an [`InMemoryRelay`].
#[derive(Clone)]
pub struct InMemorySocket {
    id: u64,
    relay: InMemoryRelay,
    events: broadcast::Sender<SocketEvent>,
}

#[async_trait]
impl RelaySocket for InMemorySocket {
    async fn connect(&self) -> Result<(), RelayError> {
        self.relay.set_connected(self.id, true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        self.relay.set_connected(self.id, false);
        Ok(())
    }

    async fn send(&self, text: String) -> Result<(), RelayError> {
        if !self.relay.is_connected(self.id) {
            return Err(RelayError::NotConnected);
        }
        self.relay.handle(self.id, &text)
    }

    fn events(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.relay.is_connected(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_fans_out_to_other_subscribers_only() {
        let relay = InMemoryRelay::new();
        let a = relay.socket();
        let b = relay.socket();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut a_events = a.events();
        let mut b_events = b.events();

        let topic = Topic::generate();
        for socket in [&a, &b] {
            let sub = RpcRequest::new("irn_subscribe", json!({ "topic": topic }));
            socket.send(serde_json::to_string(&sub).unwrap()).await.unwrap();
        }
        let publish = RpcRequest::new(
            "irn_publish",
            json!({ "topic": topic, "message": "m", "ttl": 300, "tag": 1, "prompt": false }),
        );
        a.send(serde_json::to_string(&publish).unwrap()).await.unwrap();

        let mut b_frames = Vec::new();
        while let Ok(SocketEvent::Message(text)) = b_events.try_recv() {
            b_frames.push(text);
        }
        assert!(b_frames.iter().any(|f| f.contains("irn_subscription")));

        let mut a_frames = Vec::new();
        while let Ok(SocketEvent::Message(text)) = a_events.try_recv() {
            a_frames.push(text);
        }
        assert!(a_frames.iter().all(|f| !f.contains("irn_subscription")));
        assert_eq!(relay.published(&topic).len(), 1);
    }

    #[tokio::test]
    async fn test_mailbox_replayed_on_subscribe() {
        let relay = InMemoryRelay::new();
        let a = relay.socket();
        let b = relay.socket();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let topic = Topic::generate();
        let publish = RpcRequest::new(
            "irn_publish",
            json!({ "topic": topic, "message": "early", "ttl": 300, "tag": 1, "prompt": false }),
        );
        a.send(serde_json::to_string(&publish).unwrap()).await.unwrap();

        let mut b_events = b.events();
        let sub = RpcRequest::new("irn_subscribe", json!({ "topic": topic }));
        b.send(serde_json::to_string(&sub).unwrap()).await.unwrap();

        let mut saw_early = false;
        while let Ok(SocketEvent::Message(text)) = b_events.try_recv() {
            saw_early |= text.contains("early");
        }
        assert!(saw_early);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let relay = InMemoryRelay::new();
        let a = relay.socket();
        assert!(matches!(a.send("{}".into()).await, Err(RelayError::NotConnected)));
    }
}
