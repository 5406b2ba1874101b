//! Pairing engine.
//!
//! Owns the pairing store, answers `wc_pairing*` requests from peers, rejects
//! requests nobody registered for with 10001, and sweeps expired pairings.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Pairing, PairingError, PairingEvent, WalletConnectUri};
use crate::config::CoreConfig;
use crate::crypto::{KeyManagementService, SymmetricKey};
use crate::envelope::EnvelopeType;
use crate::reason::Reason;
use crate::relay::protocol::{PAIRING_DELETE, PAIRING_EXTEND, PAIRING_METHODS, PAIRING_PING};
use crate::relay::{InboundRequest, NetworkingInteractor};
use crate::rpc::{RpcRequest, RpcResult};
use crate::storage::{CodableStore, KeyValueStorage};
use crate::{unix_now, AppMetadata, RelayProtocolOptions, Result, Topic, WalletConnectError};

const STORE_PREFIX: &str = "pairing";

#[derive(Debug, Serialize, Deserialize)]
struct ExtendParams {
    expiry: i64,
}

struct Inner {
    config: CoreConfig,
    interactor: NetworkingInteractor,
    kms: KeyManagementService,
    store: CodableStore<Pairing>,
    registered: RwLock<HashSet<String>>,
    events: broadcast::Sender<PairingEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Creates, joins, maintains and deletes pairings.
#[derive(Clone)]
pub struct PairingEngine {
    inner: Arc<Inner>,
}

impl PairingEngine {
    pub fn new(
        config: CoreConfig,
        interactor: NetworkingInteractor,
        kms: KeyManagementService,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                interactor,
                kms,
                store: CodableStore::new(storage, STORE_PREFIX),
                registered: RwLock::new(HashSet::new()),
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pairing lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<PairingEvent> {
        self.inner.events.subscribe()
    }

    /// Declare request methods some engine handles on pairing topics.
    /// Requests for anything else are answered with 10001.
    pub fn register_methods(&self, methods: &[&str]) -> Result<()> {
        let mut registered = self
            .inner
            .registered
            .write()
            .map_err(|_| WalletConnectError::internal("registered methods lock poisoned"))?;
        registered.extend(methods.iter().map(|m| m.to_string()));
        Ok(())
    }

    fn is_registered(&self, method: &str) -> bool {
        PAIRING_METHODS.contains(&method)
            || self
                .inner
                .registered
                .read()
                .map(|r| r.contains(method))
                .unwrap_or(false)
    }

    /// Spawn the request handlers and the expiry sweeper, then restore
    /// subscriptions for stored pairings. Idempotent.
    pub async fn start(&self) -> Result<()> {
        {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .map_err(|_| WalletConnectError::internal("pairing task lock poisoned"))?;
            if tasks.is_empty() {
                tasks.push(self.spawn_pairing_handler());
                tasks.push(self.spawn_unsupported_handler());
                tasks.push(self.spawn_expiry_sweeper(self.inner.config.sweep_interval()));
            }
        }
        self.resubscribe_all().await
    }

    /// Create a new inactive pairing and return its URI for the peer.
    pub async fn create(&self, methods: Option<Vec<String>>) -> Result<WalletConnectUri> {
        let now = unix_now();
        let sym_key = SymmetricKey::generate();
        let topic = Topic::generate();
        let mut pairing = Pairing::new(
            topic.clone(),
            RelayProtocolOptions::new(self.inner.config.relay_protocol.clone()),
            now,
        );
        pairing.methods = methods;

        self.inner.kms.set_symmetric_key(&sym_key, &topic)?;
        self.inner.store.set(topic.as_str(), &pairing)?;
        if let Err(e) = self.inner.interactor.subscribe(&topic).await {
            self.discard(&topic);
            return Err(e);
        }

        info!(%topic, "pairing created");
        self.emit(PairingEvent::Created { topic });
        Ok(pairing.uri(sym_key))
    }

    /// Join the pairing described by `uri`.
    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        let uri = WalletConnectUri::parse(uri)?;
        let now = unix_now();
        let pairing = Pairing::from_uri(&uri, now);
        if pairing.is_expired(now) {
            return Err(PairingError::MalformedPairingUri("pairing URI expired".into()).into());
        }

        let topic = uri.topic.clone();
        self.inner.store.modify(topic.as_str(), |current| {
            if current.is_some() {
                return Err(WalletConnectError::from(PairingError::PairingAlreadyExists(
                    topic.to_string(),
                )));
            }
            *current = Some(pairing.clone());
            Ok(())
        })?;

        // The relay replays its mailbox as soon as we subscribe, so the key
        // has to be in place first.
        let subscribed = match self.inner.kms.set_symmetric_key(&uri.sym_key, &topic) {
            Ok(()) => self.inner.interactor.subscribe(&topic).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = subscribed {
            self.discard(&topic);
            return Err(e);
        }

        info!(%topic, "paired");
        self.emit(PairingEvent::Paired { topic });
        Ok(pairing)
    }

    /// Mark the pairing active, recording the peer's metadata if known.
    pub fn activate(&self, topic: &Topic, peer_metadata: Option<AppMetadata>) -> Result<Pairing> {
        let now = unix_now();
        let pairing = self.inner.store.modify(topic.as_str(), |current| {
            let pairing = current
                .as_mut()
                .ok_or_else(|| PairingError::NoPairing(topic.to_string()))?;
            pairing.activate(now);
            if peer_metadata.is_some() {
                pairing.peer_metadata = peer_metadata.clone();
            }
            Ok::<_, WalletConnectError>(pairing.clone())
        })?;
        info!(%topic, expiry = pairing.expiry, "pairing activated");
        self.emit(PairingEvent::Activated {
            topic: topic.clone(),
            peer_metadata: pairing.peer_metadata.clone(),
        });
        Ok(pairing)
    }

    /// Extend the pairing by `ttl` seconds and tell the peer.
    pub async fn update_expiry(&self, topic: &Topic, ttl: i64) -> Result<i64> {
        let now = unix_now();
        let expiry = self.inner.store.modify(topic.as_str(), |current| {
            let pairing = current
                .as_mut()
                .ok_or_else(|| PairingError::NoPairing(topic.to_string()))?;
            Ok::<_, WalletConnectError>(pairing.update_expiry_by(ttl, now)?)
        })?;

        let request = RpcRequest::from_params(PAIRING_EXTEND.method, &ExtendParams { expiry })?;
        if let Err(e) = self
            .inner
            .interactor
            .request(&request, topic, &EnvelopeType::Type0)
            .await
        {
            warn!(%topic, error = %e, "failed to notify peer of pairing extension");
        }
        self.emit(PairingEvent::Extended {
            topic: topic.clone(),
            expiry,
        });
        Ok(expiry)
    }

    /// Round-trip a ping to the peer.
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        self.require(topic)?;
        let request = RpcRequest::new(PAIRING_PING.method, json!({}));
        let response = self
            .inner
            .interactor
            .request_and_await(
                &request,
                topic,
                &EnvelopeType::Type0,
                self.inner.config.ack_timeout(),
            )
            .await?;
        match response.outcome {
            RpcResult::Result(_) => Ok(()),
            RpcResult::Error(error) => Err(PairingError::Peer(Reason::from(error)).into()),
        }
    }

    /// Tell the peer we are leaving, then drop the pairing locally.
    ///
    /// Local deletion happens even if the peer cannot be reached.
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        self.require(topic)?;
        let reason = Reason::user_disconnected();
        let request = RpcRequest::from_params(PAIRING_DELETE.method, &reason)?;
        if let Err(e) = self
            .inner
            .interactor
            .request_network_ack(&request, topic, &EnvelopeType::Type0)
            .await
        {
            warn!(%topic, error = %e, "pairing delete not delivered");
        }
        if self.remove(topic).await?.is_some() {
            self.emit(PairingEvent::Deleted {
                topic: topic.clone(),
                reason,
            });
        }
        Ok(())
    }

    pub fn get_pairing(&self, topic: &Topic) -> Result<Option<Pairing>> {
        Ok(self.inner.store.get(topic.as_str())?)
    }

    /// All stored pairings that have not expired.
    pub fn get_pairings(&self) -> Result<Vec<Pairing>> {
        let now = unix_now();
        Ok(self
            .inner
            .store
            .get_all()?
            .into_iter()
            .filter(|p| !p.is_expired(now))
            .collect())
    }

    /// Delete every pairing expired at `now`. Returns the removed topics.
    pub async fn sweep_expired(&self, now: i64) -> Result<Vec<Topic>> {
        let expired: Vec<Topic> = self
            .inner
            .store
            .get_all()?
            .into_iter()
            .filter(|p| p.is_expired(now))
            .map(|p| p.topic)
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for topic in expired {
            if self.remove(&topic).await?.is_some() {
                debug!(%topic, "pairing expired");
                self.emit(PairingEvent::Expired {
                    topic: topic.clone(),
                });
                removed.push(topic);
            }
        }
        Ok(removed)
    }

    /// Sweep, then subscribe to every remaining pairing topic.
    pub async fn resubscribe_all(&self) -> Result<()> {
        self.sweep_expired(unix_now()).await?;
        let topics: Vec<Topic> = self.get_pairings()?.into_iter().map(|p| p.topic).collect();
        if !topics.is_empty() {
            self.inner.interactor.batch_subscribe(&topics).await?;
        }
        Ok(())
    }

    fn require(&self, topic: &Topic) -> Result<Pairing> {
        self.get_pairing(topic)?
            .ok_or_else(|| PairingError::NoPairing(topic.to_string()).into())
    }

    /// Remove the record, its keys, its history and the subscription.
    async fn remove(&self, topic: &Topic) -> Result<Option<Pairing>> {
        let removed = self
            .inner
            .store
            .modify(topic.as_str(), |current| Ok::<_, WalletConnectError>(current.take()))?;
        if removed.is_none() {
            return Ok(None);
        }
        if let Err(e) = self.inner.interactor.unsubscribe(topic).await {
            warn!(%topic, error = %e, "unsubscribe failed while removing pairing");
        }
        self.inner.kms.delete_topic_keys(topic)?;
        Ok(removed)
    }

    /// Roll back a half-created pairing.
    fn discard(&self, topic: &Topic) {
        if let Err(e) = self.inner.store.delete(topic.as_str()) {
            warn!(%topic, error = %e, "failed to discard pairing record");
        }
        if let Err(e) = self.inner.kms.delete_symmetric_key(topic) {
            warn!(%topic, error = %e, "failed to discard pairing key");
        }
    }

    fn emit(&self, event: PairingEvent) {
        let _ = self.inner.events.send(event);
    }

    async fn handle_request(&self, inbound: InboundRequest) -> Result<()> {
        let topic = inbound.topic.clone();
        let Some(id) = inbound.id().cloned() else {
            return Ok(());
        };
        if self.get_pairing(&topic)?.is_none() {
            debug!(%topic, method = %inbound.request.method, "pairing request on unknown topic");
            return Ok(());
        }

        match inbound.request.method.as_str() {
            m if m == PAIRING_PING.method => {
                self.inner
                    .interactor
                    .respond_ack(&topic, &id, &inbound.envelope)
                    .await?;
                self.emit(PairingEvent::Pinged { topic });
            }
            m if m == PAIRING_DELETE.method => {
                let reason = inbound
                    .request
                    .params_as::<Reason>()
                    .unwrap_or_else(|_| Reason::user_disconnected());
                self.inner
                    .interactor
                    .respond_ack(&topic, &id, &inbound.envelope)
                    .await?;
                if self.remove(&topic).await?.is_some() {
                    info!(%topic, code = reason.code, "peer deleted pairing");
                    self.emit(PairingEvent::Deleted { topic, reason });
                }
            }
            m if m == PAIRING_EXTEND.method => {
                let now = unix_now();
                let extended = inbound
                    .request
                    .params_as::<ExtendParams>()
                    .map_err(|_| PairingError::InvalidUpdateExpiryValue)
                    .and_then(|params| {
                        self.inner.store.modify(topic.as_str(), |current| {
                            let pairing = current
                                .as_mut()
                                .ok_or_else(|| PairingError::NoPairing(topic.to_string()))?;
                            Ok::<_, WalletConnectError>(
                                pairing.update_expiry_to(params.expiry, now)?,
                            )
                        })
                        .map_err(|_| PairingError::InvalidUpdateExpiryValue)
                    });
                match extended {
                    Ok(expiry) => {
                        self.inner
                            .interactor
                            .respond_ack(&topic, &id, &inbound.envelope)
                            .await?;
                        self.emit(PairingEvent::Extended { topic, expiry });
                    }
                    Err(_) => {
                        self.inner
                            .interactor
                            .respond_error(
                                &topic,
                                &id,
                                Reason::invalid_extend_request(),
                                &inbound.envelope,
                            )
                            .await?;
                    }
                }
            }
            other => debug!(%topic, method = other, "unexpected pairing method"),
        }
        Ok(())
    }

    async fn reject_unsupported(&self, inbound: InboundRequest) -> Result<()> {
        let method = inbound.request.method.as_str();
        let Some(id) = inbound.id() else {
            return Ok(());
        };
        if self.is_registered(method) || self.get_pairing(&inbound.topic)?.is_none() {
            return Ok(());
        }
        debug!(topic = %inbound.topic, method, "rejecting unsupported method");
        self.inner
            .interactor
            .respond_error(
                &inbound.topic,
                id,
                Reason::wc_method_unsupported(),
                &inbound.envelope,
            )
            .await
    }

    fn spawn_pairing_handler(&self) -> JoinHandle<()> {
        let mut requests = self.inner.interactor.request_subscription(&PAIRING_METHODS);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(inbound) = requests.recv().await {
                let Some(engine) = upgrade(&weak) else { break };
                let method = inbound.request.method.clone();
                if let Err(e) = engine.handle_request(inbound).await {
                    warn!(%method, error = %e, "pairing request handling failed");
                }
            }
        })
    }

    fn spawn_unsupported_handler(&self) -> JoinHandle<()> {
        let mut requests = self.inner.interactor.all_requests();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let inbound = match requests.recv().await {
                    Ok(inbound) => inbound,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "pairing engine lagged behind requests");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(engine) = upgrade(&weak) else { break };
                if let Err(e) = engine.reject_unsupported(inbound).await {
                    warn!(error = %e, "failed to reject unsupported method");
                }
            }
        })
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// engine is dropped.
    pub fn spawn_expiry_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = upgrade(&weak) else { break };
                if let Err(e) = engine.sweep_expired(unix_now()).await {
                    warn!(error = %e, "pairing expiry sweep failed");
                }
            }
        })
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<PairingEngine> {
    weak.upgrade().map(|inner| PairingEngine { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyManagementService;
    use crate::history::RpcHistory;
    use crate::relay::RelayClient;
    use crate::secure_storage::InMemoryKeyStorage;
    use crate::storage::InMemoryStorage;
    use crate::test_utils::InMemoryRelay;
    use crate::{AppMetadata, ErrorCode, Serializer};

    const WAIT: Duration = Duration::from_secs(2);

    async fn peer(relay: &InMemoryRelay, name: &str) -> PairingEngine {
        let config = CoreConfig::new(AppMetadata::new(name, "https://example.com"))
            .with_ack_timeout(Duration::from_millis(500));
        let kms = KeyManagementService::new(Arc::new(InMemoryKeyStorage::new()));
        let client = RelayClient::new(Arc::new(relay.socket()), config.ack_timeout(), 64);
        let history = Arc::new(RpcHistory::new(Arc::new(InMemoryStorage::new())));
        let interactor = NetworkingInteractor::new(client, Serializer::new(kms.clone()), history, 64);
        interactor.relay().connect().await.unwrap();
        interactor.start().unwrap();
        let engine = PairingEngine::new(config, interactor, kms, Arc::new(InMemoryStorage::new()));
        engine.start().await.unwrap();
        engine
    }

    async fn next_event(rx: &mut broadcast::Receiver<PairingEvent>) -> PairingEvent {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_create_and_pair() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let wallet = peer(&relay, "wallet").await;

        let uri = dapp.create(Some(vec!["wc_sessionPropose".into()])).await.unwrap();
        let pairing = wallet.pair(&uri.to_string()).await.unwrap();
        assert_eq!(pairing.topic, uri.topic);
        assert!(!pairing.active);
        assert_eq!(relay.subscriber_count(&uri.topic), 2);

        let err = wallet.pair(&uri.to_string()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PairingAlreadyExists);

        let err = wallet.pair("wc:nope").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPairingUri);
    }

    #[tokio::test]
    async fn test_ping_roundtrip() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let wallet = peer(&relay, "wallet").await;
        let mut wallet_events = wallet.events();

        let uri = dapp.create(None).await.unwrap();
        wallet.pair(&uri.to_string()).await.unwrap();
        assert!(matches!(next_event(&mut wallet_events).await, PairingEvent::Paired { .. }));

        dapp.ping(&uri.topic).await.unwrap();
        assert_eq!(
            next_event(&mut wallet_events).await,
            PairingEvent::Pinged {
                topic: uri.topic.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_ping_unknown_topic() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let err = dapp.ping(&Topic::generate()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoPairing);
    }

    #[tokio::test]
    async fn test_disconnect_deletes_on_both_sides() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let wallet = peer(&relay, "wallet").await;
        let uri = dapp.create(None).await.unwrap();
        wallet.pair(&uri.to_string()).await.unwrap();
        let mut wallet_events = wallet.events();

        dapp.disconnect(&uri.topic).await.unwrap();
        assert!(dapp.get_pairing(&uri.topic).unwrap().is_none());
        assert!(dapp.inner.kms.get_symmetric_key(&uri.topic).unwrap().is_none());

        match next_event(&mut wallet_events).await {
            PairingEvent::Deleted { topic, reason } => {
                assert_eq!(topic, uri.topic);
                assert_eq!(reason.code, 6000);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(wallet.get_pairing(&uri.topic).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activate_and_extend() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let wallet = peer(&relay, "wallet").await;
        let uri = dapp.create(None).await.unwrap();
        wallet.pair(&uri.to_string()).await.unwrap();

        let before = dapp.get_pairing(&uri.topic).unwrap().unwrap().expiry;
        let extended = dapp.update_expiry(&uri.topic, crate::config::DAY).await.unwrap();
        assert_eq!(extended, before + crate::config::DAY);

        let active = dapp
            .activate(&uri.topic, Some(AppMetadata::new("wallet", "https://w.example")))
            .unwrap();
        assert!(active.active);
        wallet.activate(&uri.topic, None).unwrap();

        // Already at the active ceiling: any extension overshoots.
        let err = dapp.update_expiry(&uri.topic, 60).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUpdateExpiryValue);
    }

    /// Records the level and message of every event.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<(tracing::Level, String)>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Captured {
        fn on_event(&self, event: &tracing::Event<'_>, _: tracing_subscriber::layer::Context<'_, S>) {
            struct Message(String);
            impl tracing::field::Visit for Message {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "message" {
                        self.0 = format!("{:?}", value);
                    }
                }
            }
            let mut message = Message(String::new());
            event.record(&mut message);
            if let Ok(mut events) = self.0.lock() {
                events.push((*event.metadata().level(), message.0));
            }
        }
    }

    #[tokio::test]
    async fn test_activation_logged_at_info() {
        use tracing_subscriber::layer::SubscriberExt;

        let captured = Captured::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(captured.clone()));
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let uri = dapp.create(None).await.unwrap();
        dapp.activate(&uri.topic, None).unwrap();

        let events = captured.0.lock().unwrap();
        assert!(events
            .iter()
            .any(|(level, message)| *level == tracing::Level::INFO && message == "pairing activated"));
    }

    #[tokio::test]
    async fn test_unregistered_method_rejected() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let wallet = peer(&relay, "wallet").await;
        let uri = dapp.create(None).await.unwrap();
        wallet.pair(&uri.to_string()).await.unwrap();

        let request = RpcRequest::new("wc_sessionPropose", json!({}));
        let response = dapp
            .inner
            .interactor
            .request_and_await(&request, &uri.topic, &EnvelopeType::Type0, WAIT)
            .await
            .unwrap();
        match response.outcome {
            RpcResult::Error(error) => assert_eq!(error.code, 10001),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registered_method_not_rejected() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let wallet = peer(&relay, "wallet").await;
        wallet.register_methods(&["wc_sessionPropose"]).unwrap();
        let uri = dapp.create(None).await.unwrap();
        wallet.pair(&uri.to_string()).await.unwrap();

        let request = RpcRequest::new("wc_sessionPropose", json!({}));
        let result = dapp
            .inner
            .interactor
            .request_and_await(&request, &uri.topic, &EnvelopeType::Type0, Duration::from_millis(200))
            .await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let relay = InMemoryRelay::new();
        let dapp = peer(&relay, "dapp").await;
        let mut events = dapp.events();
        let uri = dapp.create(None).await.unwrap();
        assert!(matches!(next_event(&mut events).await, PairingEvent::Created { .. }));

        assert!(dapp.sweep_expired(unix_now()).await.unwrap().is_empty());
        let removed = dapp
            .sweep_expired(unix_now() + crate::config::INACTIVE_PAIRING_TTL)
            .await
            .unwrap();
        assert_eq!(removed, vec![uri.topic.clone()]);
        assert_eq!(
            next_event(&mut events).await,
            PairingEvent::Expired { topic: uri.topic }
        );
        assert!(dapp.get_pairings().unwrap().is_empty());
    }
}
