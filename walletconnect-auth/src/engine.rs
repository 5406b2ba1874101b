//! `wc_sessionAuthenticate` engine for both roles.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walletconnect_core::config::AUTH_REQUEST_TTL;
use walletconnect_core::history::Origin;
use walletconnect_core::pairing::PairingError;
use walletconnect_core::relay::protocol::SESSION_AUTHENTICATE;
use walletconnect_core::relay::{InboundRequest, InboundResponse};
use walletconnect_core::rpc::RpcResult;
use walletconnect_core::storage::CodableStore;
use walletconnect_core::{
    expiry, unix_now, Account, AgreementPublicKey, Core, EnvelopeType, Participant, Reason, RpcId,
    RpcRequest, Topic, WalletConnectError, WalletConnectUri,
};

use crate::cacao::{sign_cacao, Cacao, MessageSigner, SignatureVerifier};
use crate::payload::{AuthPayload, AuthRequestParams, SessionAuthenticateParams};
use crate::{AuthError, Result};

const STORE_PREFIX: &str = "auth_request";

/// `wc_sessionAuthenticate` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAuthenticateResponse {
    pub cacaos: Vec<Cacao>,
    pub responder: Participant,
}

/// An authentication request in flight, sent or received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthRequest {
    pub id: RpcId,
    pub pairing_topic: Topic,
    pub origin: Origin,
    pub requester: Participant,
    pub payload: AuthPayload,
    /// `sha256(requester public key)`.
    pub response_topic: Topic,
    pub expiry: i64,
}

impl PendingAuthRequest {
    pub fn is_expired(&self, now: i64) -> bool {
        expiry::is_expired(self.expiry, now)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    /// A peer asks us to authenticate (responder side).
    Request(PendingAuthRequest),
    /// Verified cacaos for one of our requests.
    Response {
        id: RpcId,
        cacaos: Vec<Cacao>,
        responder: Participant,
    },
    Rejected { id: RpcId, reason: Reason },
    /// The peer answered, but a cacao did not match the request or verify.
    InvalidResponse { id: RpcId, error: String },
    Expired { id: RpcId },
}

#[derive(Clone, Debug)]
pub struct AuthenticateResult {
    /// URI for the responder when a new pairing was created.
    pub uri: Option<WalletConnectUri>,
    pub pairing_topic: Topic,
    pub id: RpcId,
}

struct Inner {
    core: Core,
    requests: CodableStore<PendingAuthRequest>,
    verifier: Arc<dyn SignatureVerifier>,
    events: broadcast::Sender<AuthEvent>,
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

#[derive(Clone)]
pub struct AuthEngine {
    inner: Arc<Inner>,
}

impl AuthEngine {
    pub fn new(core: Core, verifier: Arc<dyn SignatureVerifier>) -> Self {
        let (events, _) = broadcast::channel(core.config().event_channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                requests: CodableStore::new(core.storage().clone(), STORE_PREFIX),
                core,
                verifier,
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn core(&self) -> &Core {
        &self.inner.core
    }

    pub fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Register with the pairing engine and spawn the handlers. Idempotent.
    pub async fn start(&self) -> Result<()> {
        self.core().pairing().register_methods(&[SESSION_AUTHENTICATE.method])?;
        {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .map_err(|_| WalletConnectError::internal("auth task lock poisoned"))?;
            if tasks.is_empty() {
                tasks.push(self.spawn_request_handler());
                tasks.push(self.spawn_response_handler());
                tasks.push(self.spawn_expiry_sweeper(self.core().config().sweep_interval()));
            }
        }
        self.sweep_expired(unix_now()).await?;

        // Responses to our own requests arrive on their response topics.
        let topics: Vec<Topic> = self
            .inner
            .requests
            .get_all()?
            .into_iter()
            .filter(|r| r.origin == Origin::Local)
            .map(|r| r.response_topic)
            .collect();
        if !topics.is_empty() {
            self.core().interactor().batch_subscribe(&topics).await?;
        }
        Ok(())
    }

    /// Ask the peer on `pairing_topic` (or a new pairing) to sign in.
    pub async fn authenticate(
        &self,
        params: AuthRequestParams,
        pairing_topic: Option<Topic>,
    ) -> Result<AuthenticateResult> {
        let payload = AuthPayload::from_params(params, Utc::now())?;
        let now = unix_now();
        let expiry = match payload.expiry()? {
            Some(exp) if exp <= now => {
                return Err(AuthError::InvalidPayload("expiration time is in the past".into()))
            }
            Some(exp) => exp.min(now + AUTH_REQUEST_TTL),
            None => now + AUTH_REQUEST_TTL,
        };

        let core = self.core();
        let (uri, pairing_topic) = match pairing_topic {
            Some(topic) => {
                if core.pairing().get_pairing(&topic)?.is_none() {
                    return Err(PairingError::NoPairing(topic.to_string()).into());
                }
                (None, topic)
            }
            None => {
                let uri = core
                    .pairing()
                    .create(Some(vec![SESSION_AUTHENTICATE.method.to_string()]))
                    .await?;
                let topic = uri.topic.clone();
                (Some(uri), topic)
            }
        };

        let public_key = core.kms().create_x25519_key_pair()?;
        let response_topic = public_key.derive_topic();
        core.kms().set_public_key(&public_key, &response_topic)?;
        core.interactor().subscribe(&response_topic).await?;

        let requester = Participant {
            public_key: public_key.to_hex(),
            metadata: core.config().metadata.clone(),
        };
        let request = RpcRequest::from_params(
            SESSION_AUTHENTICATE.method,
            &SessionAuthenticateParams {
                auth_payload: payload.clone(),
                requester: requester.clone(),
                expiry_timestamp: expiry,
            },
        )?;
        let id = request
            .id
            .clone()
            .ok_or(walletconnect_core::history::HistoryError::UnidentifiedRequest)?;
        let pending = PendingAuthRequest {
            id: id.clone(),
            pairing_topic: pairing_topic.clone(),
            origin: Origin::Local,
            requester,
            payload,
            response_topic,
            expiry,
        };
        self.inner.requests.set(&id.as_key(), &pending)?;

        if let Err(e) = core
            .interactor()
            .request(&request, &pairing_topic, &EnvelopeType::Type0)
            .await
        {
            self.forget(&pending).await;
            return Err(e.into());
        }
        info!(topic = %pairing_topic, %id, "authentication requested");
        Ok(AuthenticateResult {
            uri,
            pairing_topic,
            id,
        })
    }

    /// Received requests not yet answered.
    pub fn get_pending_requests(&self) -> Result<Vec<PendingAuthRequest>> {
        let now = unix_now();
        Ok(self
            .inner
            .requests
            .get_all()?
            .into_iter()
            .filter(|r| r.origin == Origin::Remote && !r.is_expired(now))
            .collect())
    }

    /// Sign the request's payload for each of `accounts` and approve with the
    /// resulting cacaos.
    pub async fn approve_with_signer(
        &self,
        id: &RpcId,
        accounts: &[Account],
        signer: &dyn MessageSigner,
    ) -> Result<Vec<Cacao>> {
        let pending = self.require_remote(id)?;
        let mut cacaos = Vec::with_capacity(accounts.len());
        for account in accounts {
            cacaos.push(sign_cacao(&pending.payload, account, signer).await?);
        }
        self.approve(id, cacaos.clone()).await?;
        Ok(cacaos)
    }

    /// Answer request `id` with signed `cacaos`.
    pub async fn approve(&self, id: &RpcId, cacaos: Vec<Cacao>) -> Result<()> {
        let pending = self.require_remote(id)?;
        if cacaos.is_empty() {
            return Err(AuthError::InvalidCacao("at least one cacao is required".into()));
        }
        for cacao in &cacaos {
            cacao.matches(&pending.payload)?;
        }

        let core = self.core();
        let (self_key, envelope) = self.seal_response_topic(&pending)?;
        let response = SessionAuthenticateResponse {
            cacaos,
            responder: Participant {
                public_key: self_key.to_hex(),
                metadata: core.config().metadata.clone(),
            },
        };
        let sent = core
            .interactor()
            .respond_success(&pending.response_topic, &pending.id, &response, &envelope)
            .await;
        self.release_response_topic(&pending, &self_key);
        sent?;

        self.inner.requests.delete(&id.as_key())?;
        if let Err(e) = core
            .pairing()
            .activate(&pending.pairing_topic, Some(pending.requester.metadata.clone()))
        {
            warn!(topic = %pending.pairing_topic, error = %e, "pairing activation failed");
        }
        info!(%id, "authentication approved");
        Ok(())
    }

    /// Refuse request `id`.
    pub async fn reject(&self, id: &RpcId, reason: Reason) -> Result<()> {
        let pending = self
            .inner
            .requests
            .get(&id.as_key())?
            .filter(|r| r.origin == Origin::Remote)
            .ok_or_else(|| AuthError::NoRequest(id.to_string()))?;
        let (self_key, envelope) = self.seal_response_topic(&pending)?;
        let sent = self
            .core()
            .interactor()
            .respond_error(&pending.response_topic, &pending.id, reason, &envelope)
            .await;
        self.release_response_topic(&pending, &self_key);
        sent?;
        self.inner.requests.delete(&id.as_key())?;
        Ok(())
    }

    /// Drop requests expired at `now`.
    pub async fn sweep_expired(&self, now: i64) -> Result<Vec<RpcId>> {
        let mut expired = Vec::new();
        for pending in self.inner.requests.get_all()? {
            if pending.is_expired(now) {
                debug!(id = %pending.id, "auth request expired");
                self.forget(&pending).await;
                self.emit(AuthEvent::Expired {
                    id: pending.id.clone(),
                });
                expired.push(pending.id);
            }
        }
        Ok(expired)
    }

    pub fn spawn_expiry_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = upgrade(&weak) else { break };
                if let Err(e) = engine.sweep_expired(unix_now()).await {
                    warn!(error = %e, "auth expiry sweep failed");
                }
            }
        })
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.inner.events.send(event);
    }

    fn require_remote(&self, id: &RpcId) -> Result<PendingAuthRequest> {
        let pending = self
            .inner
            .requests
            .get(&id.as_key())?
            .filter(|r| r.origin == Origin::Remote)
            .ok_or_else(|| AuthError::NoRequest(id.to_string()))?;
        if pending.is_expired(unix_now()) {
            self.inner.requests.delete(&id.as_key())?;
            return Err(AuthError::RequestExpired(id.to_string()));
        }
        Ok(pending)
    }

    /// Agree on a key with the requester and bind it to the response topic.
    fn seal_response_topic(&self, pending: &PendingAuthRequest) -> Result<(AgreementPublicKey, EnvelopeType)> {
        let kms = self.core().kms();
        let self_key = kms.create_x25519_key_pair()?;
        let secret = kms.perform_key_agreement(&self_key, &pending.requester.public_key)?;
        kms.set_agreement_secret(&secret, &pending.response_topic)?;
        Ok((
            self_key,
            EnvelopeType::Type1 {
                sender_public_key: self_key,
            },
        ))
    }

    fn release_response_topic(&self, pending: &PendingAuthRequest, self_key: &AgreementPublicKey) {
        let kms = self.core().kms();
        if let Err(e) = kms
            .delete_topic_keys(&pending.response_topic)
            .and_then(|_| kms.delete_private_key(self_key))
        {
            warn!(id = %pending.id, error = %e, "failed to release response keys");
        }
    }

    /// Delete the record and, for our own requests, the response topic and key.
    async fn forget(&self, pending: &PendingAuthRequest) {
        if let Err(e) = self.inner.requests.delete(&pending.id.as_key()) {
            warn!(id = %pending.id, error = %e, "failed to delete auth request");
        }
        if pending.origin != Origin::Local {
            return;
        }
        let core = self.core();
        if let Err(e) = core.interactor().unsubscribe(&pending.response_topic).await {
            debug!(topic = %pending.response_topic, error = %e, "unsubscribe failed");
        }
        let released = core.kms().delete_topic_keys(&pending.response_topic).and_then(|_| {
            match AgreementPublicKey::from_hex(&pending.requester.public_key) {
                Ok(key) => core.kms().delete_private_key(&key),
                Err(e) => Err(e),
            }
        });
        if let Err(e) = released {
            warn!(id = %pending.id, error = %e, "failed to release request keys");
        }
    }

    async fn handle_request(&self, inbound: InboundRequest) -> Result<()> {
        if self.core().pairing().get_pairing(&inbound.topic)?.is_none() {
            debug!(topic = %inbound.topic, "auth request on unknown pairing");
            return Ok(());
        }
        let Some(id) = inbound.id().cloned() else {
            return Ok(());
        };
        let reply = |reason: Reason| {
            let topic = inbound.topic.clone();
            let id = id.clone();
            let envelope = inbound.envelope.clone();
            async move {
                warn!(%topic, %id, code = reason.code, "rejecting auth request");
                self.core()
                    .interactor()
                    .respond_error(&topic, &id, reason, &envelope)
                    .await
            }
        };

        let params = match inbound.request.params_as::<SessionAuthenticateParams>() {
            Ok(params) => params,
            Err(e) => {
                reply(Reason::malformed_request_params().with_message(e.to_string())).await?;
                return Ok(());
            }
        };
        if AgreementPublicKey::from_hex(&params.requester.public_key).is_err()
            || params.auth_payload.chains.is_empty()
        {
            reply(Reason::malformed_request_params()).await?;
            return Ok(());
        }
        let now = unix_now();
        if params.expiry_timestamp <= now {
            reply(Reason::request_expired()).await?;
            return Ok(());
        }

        let response_topic = AgreementPublicKey::from_hex(&params.requester.public_key)?.derive_topic();
        let pending = PendingAuthRequest {
            id: id.clone(),
            pairing_topic: inbound.topic.clone(),
            origin: Origin::Remote,
            requester: params.requester,
            payload: params.auth_payload,
            response_topic,
            expiry: params.expiry_timestamp.min(now + AUTH_REQUEST_TTL),
        };
        self.inner.requests.set(&id.as_key(), &pending)?;
        info!(topic = %inbound.topic, %id, "auth request received");
        self.emit(AuthEvent::Request(pending));
        Ok(())
    }

    async fn handle_response(&self, inbound: InboundResponse) -> Result<()> {
        let Some(id) = inbound.request.id.clone() else {
            return Ok(());
        };
        let Some(pending) = self
            .inner
            .requests
            .get(&id.as_key())?
            .filter(|r| r.origin == Origin::Local)
        else {
            debug!(%id, "response to unknown auth request");
            return Ok(());
        };

        let event = match inbound.response.outcome {
            RpcResult::Error(error) => {
                let reason = Reason::from(error);
                info!(%id, code = reason.code, "authentication rejected");
                AuthEvent::Rejected { id, reason }
            }
            RpcResult::Result(value) => match self.verify(&pending, value).await {
                Ok(response) => {
                    info!(%id, cacaos = response.cacaos.len(), "authentication verified");
                    AuthEvent::Response {
                        id,
                        cacaos: response.cacaos,
                        responder: response.responder,
                    }
                }
                Err(e) => {
                    warn!(%id, error = %e, "invalid auth response");
                    AuthEvent::InvalidResponse {
                        id,
                        error: e.to_string(),
                    }
                }
            },
        };
        self.forget(&pending).await;
        self.emit(event);
        Ok(())
    }

    async fn verify(
        &self,
        pending: &PendingAuthRequest,
        value: serde_json::Value,
    ) -> Result<SessionAuthenticateResponse> {
        let response: SessionAuthenticateResponse = serde_json::from_value(value)?;
        if response.cacaos.is_empty() {
            return Err(AuthError::InvalidCacao("response carries no cacao".into()));
        }
        for cacao in &response.cacaos {
            cacao.matches(&pending.payload)?;
            let message = cacao.message()?;
            if !self.inner.verifier.verify(cacao, &message).await? {
                return Err(AuthError::InvalidSignature(cacao.p.iss.clone()));
            }
        }
        Ok(response)
    }

    fn spawn_request_handler(&self) -> JoinHandle<()> {
        let mut requests = self
            .core()
            .interactor()
            .request_subscription(&[SESSION_AUTHENTICATE.method]);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(inbound) = requests.recv().await {
                let Some(engine) = upgrade(&weak) else { break };
                if let Err(e) = engine.handle_request(inbound).await {
                    warn!(error = %e, "auth request handling failed");
                }
            }
        })
    }

    fn spawn_response_handler(&self) -> JoinHandle<()> {
        let mut responses = self
            .core()
            .interactor()
            .response_subscription(&[SESSION_AUTHENTICATE.method]);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(inbound) = responses.recv().await {
                let Some(engine) = upgrade(&weak) else { break };
                if let Err(e) = engine.handle_response(inbound).await {
                    warn!(error = %e, "auth response handling failed");
                }
            }
        })
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<AuthEngine> {
    weak.upgrade().map(|inner| AuthEngine { inner })
}
