//! Session engine.
//!
//! Proposer (dApp) side: `connect` → propose response → derive the session
//! topic and subscribe → inbound `wc_sessionSettle` → session.
//! Responder (wallet) side: inbound `wc_sessionPropose` → `approve` → derive
//! the session topic, answer the proposal, send `wc_sessionSettle`.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walletconnect_core::config::SESSION_TTL;
use walletconnect_core::crypto::AgreementPublicKey;
use walletconnect_core::history::Origin;
use walletconnect_core::pairing::PairingError;
use walletconnect_core::relay::protocol::{
    SESSION_DELETE, SESSION_EVENT, SESSION_EXTEND, SESSION_PING, SESSION_PROPOSE, SESSION_REQUEST,
    SESSION_SETTLE, SESSION_UPDATE,
};
use walletconnect_core::relay::{InboundRequest, InboundResponse};
use walletconnect_core::rpc::RpcResult;
use walletconnect_core::storage::CodableStore;
use walletconnect_core::{
    unix_now, Blockchain, Core, EnvelopeType, Participant, Reason, RelayProtocolOptions, RpcId,
    RpcRequest, RpcResponse, Topic, WalletConnectUri,
};

use crate::events::{SessionRequest, SessionResponse, SignEvent};
use crate::namespaces::{
    validate_approval, validate_proposal_namespaces, validate_session_namespaces,
    ProposalNamespaces, SessionNamespaces,
};
use crate::params::{
    Event, Request, SessionEventParams, SessionExtendParams, SessionProposeParams,
    SessionProposeResponse, SessionRequestParams, SessionSettleParams, SessionUpdateParams,
};
use crate::session::{Proposal, Session};
use crate::{Result, SignError};

const SESSION_PREFIX: &str = "session";
const PROPOSAL_PREFIX: &str = "proposal";

const REQUEST_METHODS: [&str; 8] = [
    SESSION_PROPOSE.method,
    SESSION_SETTLE.method,
    SESSION_UPDATE.method,
    SESSION_EXTEND.method,
    SESSION_REQUEST.method,
    SESSION_EVENT.method,
    SESSION_DELETE.method,
    SESSION_PING.method,
];

const RESPONSE_METHODS: [&str; 3] = [SESSION_PROPOSE.method, SESSION_SETTLE.method, SESSION_REQUEST.method];

/// Outcome of [`SignEngine::connect`].
#[derive(Clone, Debug)]
pub struct ConnectResult {
    /// URI to share with the wallet when a new pairing was created.
    pub uri: Option<WalletConnectUri>,
    pub pairing_topic: Topic,
    /// Key identifying the proposal.
    pub proposer_public_key: String,
}

struct Inner {
    core: Core,
    sessions: CodableStore<Session>,
    proposals: CodableStore<Proposal>,
    events: broadcast::Sender<SignEvent>,
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

/// Session state machine for both the proposer and the responder role.
#[derive(Clone)]
pub struct SignEngine {
    inner: Arc<Inner>,
}

impl SignEngine {
    pub fn new(core: Core) -> Self {
        let storage = core.storage().clone();
        let (events, _) = broadcast::channel(core.config().event_channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sessions: CodableStore::new(storage.clone(), SESSION_PREFIX),
                proposals: CodableStore::new(storage, PROPOSAL_PREFIX),
                core,
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn core(&self) -> &Core {
        &self.inner.core
    }

    pub fn events(&self) -> broadcast::Receiver<SignEvent> {
        self.inner.events.subscribe()
    }

    /// Register with the pairing engine, spawn the handlers and restore
    /// session subscriptions. Idempotent.
    pub async fn start(&self) -> Result<()> {
        self.core().pairing().register_methods(&[SESSION_PROPOSE.method])?;
        {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .map_err(|_| walletconnect_core::WalletConnectError::internal("sign task lock poisoned"))?;
            if tasks.is_empty() {
                tasks.push(self.spawn_request_handler());
                tasks.push(self.spawn_response_handler());
                tasks.push(self.spawn_expiry_sweeper(self.core().config().sweep_interval()));
            }
        }
        self.sweep_expired(unix_now()).await?;
        let topics: Vec<Topic> = self.get_sessions()?.into_iter().map(|s| s.topic).collect();
        if !topics.is_empty() {
            self.core().interactor().batch_subscribe(&topics).await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Proposer side
    // ---------------------------------------------------------------------

    /// Propose a session. Creates a new pairing unless `pairing_topic` names
    /// an existing one.
    pub async fn connect(
        &self,
        required_namespaces: ProposalNamespaces,
        optional_namespaces: Option<ProposalNamespaces>,
        pairing_topic: Option<Topic>,
    ) -> Result<ConnectResult> {
        validate_proposal_namespaces(&required_namespaces)?;
        if let Some(optional) = &optional_namespaces {
            validate_proposal_namespaces(optional)?;
        }

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
                    .create(Some(vec![SESSION_PROPOSE.method.to_string()]))
                    .await?;
                let topic = uri.topic.clone();
                (Some(uri), topic)
            }
        };

        let now = unix_now();
        let public_key = core.kms().create_x25519_key_pair()?;
        let params = SessionProposeParams {
            relays: vec![RelayProtocolOptions::new(core.config().relay_protocol.clone())],
            proposer: Participant {
                public_key: public_key.to_hex(),
                metadata: core.config().metadata.clone(),
            },
            required_namespaces,
            optional_namespaces,
            session_properties: None,
            expiry_timestamp: Some(now + walletconnect_core::config::PROPOSAL_TTL),
        };
        let request = RpcRequest::from_params(SESSION_PROPOSE.method, &params)?;
        let id = request
            .id
            .clone()
            .ok_or(walletconnect_core::history::HistoryError::UnidentifiedRequest)?;
        let proposal = Proposal::new(id, pairing_topic.clone(), Origin::Local, params, now);
        self.inner.proposals.set(&public_key.to_hex(), &proposal)?;

        if let Err(e) = core
            .interactor()
            .request(&request, &pairing_topic, &EnvelopeType::Type0)
            .await
        {
            self.drop_proposal(&proposal);
            return Err(e.into());
        }
        info!(topic = %pairing_topic, "session proposed");
        Ok(ConnectResult {
            uri,
            pairing_topic,
            proposer_public_key: public_key.to_hex(),
        })
    }

    // ---------------------------------------------------------------------
    // Responder side
    // ---------------------------------------------------------------------

    /// Approve a received proposal with the granted `namespaces`.
    ///
    /// The returned session is unacknowledged until the proposer confirms the
    /// settlement; [`SignEvent::SessionSettled`] follows.
    pub async fn approve(&self, proposer_public_key: &str, namespaces: SessionNamespaces) -> Result<Session> {
        let proposal = self.require_proposal(proposer_public_key)?;
        validate_session_namespaces(&namespaces)?;
        validate_approval(&proposal.params.required_namespaces, &namespaces)?;

        let core = self.core();
        let now = unix_now();
        let self_key = core.kms().create_x25519_key_pair()?;
        let secret = core
            .kms()
            .perform_key_agreement(&self_key, proposer_public_key)?;
        let topic = secret.derive_topic();
        core.kms().set_agreement_secret(&secret, &topic)?;
        core.kms().delete_private_key(&self_key)?;
        core.interactor().subscribe(&topic).await?;

        let relay = proposal
            .params
            .relays
            .first()
            .cloned()
            .unwrap_or_default();
        let answer = SessionProposeResponse {
            relay: relay.clone(),
            responder_public_key: self_key.to_hex(),
        };
        core.interactor()
            .respond_success(&proposal.pairing_topic, &proposal.id, &answer, &EnvelopeType::Type0)
            .await?;
        self.inner.proposals.delete(proposer_public_key)?;

        let self_participant = Participant {
            public_key: self_key.to_hex(),
            metadata: core.config().metadata.clone(),
        };
        let session = Session {
            topic: topic.clone(),
            pairing_topic: proposal.pairing_topic.clone(),
            relay: relay.clone(),
            controller: self_participant.public_key.clone(),
            self_participant: self_participant.clone(),
            peer_participant: proposal.params.proposer.clone(),
            namespaces: namespaces.clone(),
            required_namespaces: proposal.params.required_namespaces.clone(),
            optional_namespaces: proposal.params.optional_namespaces.clone(),
            session_properties: proposal.params.session_properties.clone(),
            expiry: now + SESSION_TTL,
            acknowledged: false,
        };
        self.inner.sessions.set(topic.as_str(), &session)?;

        let settle = SessionSettleParams {
            relay,
            controller: self_participant,
            namespaces,
            session_properties: session.session_properties.clone(),
            expiry: session.expiry,
        };
        let request = RpcRequest::from_params(SESSION_SETTLE.method, &settle)?;
        core.interactor()
            .request(&request, &topic, &EnvelopeType::Type0)
            .await?;

        if let Err(e) = core
            .pairing()
            .activate(&proposal.pairing_topic, Some(proposal.params.proposer.metadata.clone()))
        {
            warn!(topic = %proposal.pairing_topic, error = %e, "pairing activation failed");
        }
        info!(%topic, "session approved");
        Ok(session)
    }

    /// Reject a received proposal.
    pub async fn reject(&self, proposer_public_key: &str, reason: Reason) -> Result<()> {
        let proposal = self
            .inner
            .proposals
            .get(proposer_public_key)?
            .ok_or_else(|| SignError::NoProposal(proposer_public_key.to_string()))?;
        self.core()
            .interactor()
            .respond_error(&proposal.pairing_topic, &proposal.id, reason, &EnvelopeType::Type0)
            .await?;
        self.inner.proposals.delete(proposer_public_key)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Settled sessions
    // ---------------------------------------------------------------------

    /// Replace the session's namespaces. Controller only; applied once the
    /// peer acknowledges.
    pub async fn update(&self, topic: &Topic, namespaces: SessionNamespaces) -> Result<()> {
        let session = self.require_controller(topic)?;
        validate_session_namespaces(&namespaces)?;
        validate_approval(&session.required_namespaces, &namespaces)?;

        let request = RpcRequest::from_params(
            SESSION_UPDATE.method,
            &SessionUpdateParams {
                namespaces: namespaces.clone(),
            },
        )?;
        self.await_peer(&request, topic).await?;

        self.inner.sessions.modify(topic.as_str(), |current| {
            let session = current
                .as_mut()
                .ok_or_else(|| SignError::NoSession(topic.to_string()))?;
            session.namespaces = namespaces.clone();
            Ok::<_, SignError>(())
        })?;
        self.emit(SignEvent::SessionUpdated {
            topic: topic.clone(),
            namespaces,
        });
        Ok(())
    }

    /// Extend the session by `ttl` seconds. Controller only.
    pub async fn extend(&self, topic: &Topic, ttl: i64) -> Result<i64> {
        self.require_controller(topic)?;
        let now = unix_now();
        let expiry = self.inner.sessions.modify(topic.as_str(), |current| {
            let session = current
                .as_mut()
                .ok_or_else(|| SignError::NoSession(topic.to_string()))?;
            session.update_expiry_by(ttl, now)
        })?;
        let request = RpcRequest::from_params(SESSION_EXTEND.method, &SessionExtendParams { expiry })?;
        self.core()
            .interactor()
            .request(&request, topic, &EnvelopeType::Type0)
            .await?;
        self.emit(SignEvent::SessionExtended {
            topic: topic.clone(),
            expiry,
        });
        Ok(expiry)
    }

    /// Send an application request on `chain_id`. Returns the id the peer's
    /// [`SignEvent::SessionResponse`] will carry.
    pub async fn request(&self, topic: &Topic, chain_id: Blockchain, request: Request) -> Result<RpcId> {
        let session = self.require_session(topic)?;
        if !session.has_chain(&chain_id) {
            return Err(SignError::UnauthorizedChain(chain_id.to_string()));
        }
        if !session.has_permission_for_method(&request.method, &chain_id) {
            return Err(SignError::UnauthorizedMethod {
                method: request.method,
                chain: chain_id.to_string(),
            });
        }
        let rpc = RpcRequest::from_params(SESSION_REQUEST.method, &SessionRequestParams { request, chain_id })?;
        let id = rpc
            .id
            .clone()
            .ok_or(walletconnect_core::history::HistoryError::UnidentifiedRequest)?;
        self.core()
            .interactor()
            .request(&rpc, topic, &EnvelopeType::Type0)
            .await?;
        debug!(%topic, %id, "session request sent");
        Ok(id)
    }

    /// Answer a [`SessionRequest`].
    pub async fn respond(&self, topic: &Topic, response: RpcResponse) -> Result<()> {
        self.require_session(topic)?;
        self.core()
            .interactor()
            .respond(topic, &response, &EnvelopeType::Type0)
            .await?;
        Ok(())
    }

    /// Emit an application event on `chain_id`.
    pub async fn emit_event(&self, topic: &Topic, chain_id: Blockchain, event: Event) -> Result<()> {
        let session = self.require_session(topic)?;
        if !session.has_chain(&chain_id) {
            return Err(SignError::UnauthorizedChain(chain_id.to_string()));
        }
        if !session.has_permission_for_event(&event.name, &chain_id) {
            return Err(SignError::UnauthorizedEvent {
                event: event.name,
                chain: chain_id.to_string(),
            });
        }
        let request = RpcRequest::from_params(SESSION_EVENT.method, &SessionEventParams { event, chain_id })?;
        self.core()
            .interactor()
            .request(&request, topic, &EnvelopeType::Type0)
            .await?;
        Ok(())
    }

    /// Round-trip a ping. A timeout means the peer is absent.
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        self.require_session(topic)?;
        let request = RpcRequest::new(SESSION_PING.method, json!({}));
        self.await_peer(&request, topic).await
    }

    /// Tell the peer, then delete the session locally.
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        self.require_session(topic)?;
        let reason = Reason::user_disconnected();
        let request = RpcRequest::from_params(SESSION_DELETE.method, &reason)?;
        if let Err(e) = self
            .core()
            .interactor()
            .request_network_ack(&request, topic, &EnvelopeType::Type0)
            .await
        {
            warn!(%topic, error = %e, "session delete not delivered");
        }
        if self.remove_session(topic).await?.is_some() {
            info!(%topic, "session deleted");
            self.emit(SignEvent::SessionDeleted {
                topic: topic.clone(),
                reason,
            });
        }
        Ok(())
    }

    pub fn get_session(&self, topic: &Topic) -> Result<Option<Session>> {
        Ok(self.inner.sessions.get(topic.as_str())?)
    }

    /// Sessions that have not expired.
    pub fn get_sessions(&self) -> Result<Vec<Session>> {
        let now = unix_now();
        Ok(self
            .inner
            .sessions
            .get_all()?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect())
    }

    /// Proposals received and not yet answered.
    pub fn get_pending_proposals(&self) -> Result<Vec<Proposal>> {
        let now = unix_now();
        Ok(self
            .inner
            .proposals
            .get_all()?
            .into_iter()
            .filter(|p| p.origin == Origin::Remote && !p.is_expired(now))
            .collect())
    }

    /// Peer requests on `topic` still waiting for an answer.
    pub fn pending_requests(&self, topic: &Topic) -> Result<Vec<SessionRequest>> {
        let records = self
            .core()
            .history()
            .get_pending_for_methods(&[SESSION_REQUEST.method])?;
        Ok(records
            .into_iter()
            .filter(|r| r.origin == Origin::Remote && &r.topic == topic)
            .filter_map(|r| {
                let params: SessionRequestParams = r.request.params_as().ok()?;
                Some(SessionRequest {
                    topic: r.topic,
                    id: r.id,
                    chain_id: params.chain_id,
                    request: params.request,
                })
            })
            .collect())
    }

    /// Delete sessions and proposals expired at `now`. Returns the expired
    /// session topics.
    pub async fn sweep_expired(&self, now: i64) -> Result<Vec<Topic>> {
        for proposal in self.inner.proposals.get_all()? {
            if proposal.is_expired(now) {
                debug!(key = proposal.proposer_public_key(), "proposal expired");
                self.drop_proposal(&proposal);
            }
        }

        let expired: Vec<Topic> = self
            .inner
            .sessions
            .get_all()?
            .into_iter()
            .filter(|s| s.is_expired(now))
            .map(|s| s.topic)
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for topic in expired {
            if self.remove_session(&topic).await?.is_some() {
                info!(%topic, "session expired");
                self.emit(SignEvent::SessionExpired {
                    topic: topic.clone(),
                });
                removed.push(topic);
            }
        }
        Ok(removed)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `period`.
    pub fn spawn_expiry_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = upgrade(&weak) else { break };
                if let Err(e) = engine.sweep_expired(unix_now()).await {
                    warn!(error = %e, "session expiry sweep failed");
                }
            }
        })
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn emit(&self, event: SignEvent) {
        let _ = self.inner.events.send(event);
    }

    fn require_session(&self, topic: &Topic) -> Result<Session> {
        match self.get_session(topic)? {
            Some(session) if !session.is_expired(unix_now()) => Ok(session),
            _ => Err(SignError::NoSession(topic.to_string())),
        }
    }

    fn require_controller(&self, topic: &Topic) -> Result<Session> {
        let session = self.require_session(topic)?;
        if !session.is_controller() {
            return Err(SignError::UnauthorizedNonControllerCall);
        }
        Ok(session)
    }

    fn require_proposal(&self, proposer_public_key: &str) -> Result<Proposal> {
        let proposal = self
            .inner
            .proposals
            .get(proposer_public_key)?
            .filter(|p| p.origin == Origin::Remote)
            .ok_or_else(|| SignError::NoProposal(proposer_public_key.to_string()))?;
        if proposal.is_expired(unix_now()) {
            self.drop_proposal(&proposal);
            return Err(SignError::ProposalExpired(proposer_public_key.to_string()));
        }
        Ok(proposal)
    }

    async fn await_peer(&self, request: &RpcRequest, topic: &Topic) -> Result<()> {
        let response = self
            .core()
            .interactor()
            .request_and_await(request, topic, &EnvelopeType::Type0, self.core().config().ack_timeout())
            .await?;
        match response.outcome {
            RpcResult::Result(_) => Ok(()),
            RpcResult::Error(error) => Err(SignError::Peer(Reason::from(error))),
        }
    }

    /// Forget a proposal and, for our own, the key pair behind it.
    fn drop_proposal(&self, proposal: &Proposal) {
        let key = proposal.proposer_public_key();
        if let Err(e) = self.inner.proposals.delete(key) {
            warn!(key, error = %e, "failed to delete proposal");
        }
        if proposal.origin == Origin::Local {
            if let Ok(public_key) = AgreementPublicKey::from_hex(key) {
                if let Err(e) = self.core().kms().delete_private_key(&public_key) {
                    warn!(key, error = %e, "failed to delete proposal key");
                }
            }
        }
    }

    /// Remove the record, its keys, its history and the subscription.
    async fn remove_session(&self, topic: &Topic) -> Result<Option<Session>> {
        let removed = self
            .inner
            .sessions
            .modify(topic.as_str(), |current| Ok::<_, SignError>(current.take()))?;
        if removed.is_none() {
            return Ok(None);
        }
        if let Err(e) = self.core().interactor().unsubscribe(topic).await {
            warn!(%topic, error = %e, "unsubscribe failed while removing session");
        }
        self.core().kms().delete_topic_keys(topic)?;
        Ok(removed)
    }

    async fn reply_error(&self, inbound: &InboundRequest, reason: Reason) -> Result<()> {
        let Some(id) = inbound.id() else {
            return Ok(());
        };
        warn!(
            topic = %inbound.topic,
            method = %inbound.request.method,
            code = reason.code,
            "rejecting peer request"
        );
        self.core()
            .interactor()
            .respond_error(&inbound.topic, id, reason, &inbound.envelope)
            .await?;
        Ok(())
    }

    async fn reply_ok(&self, inbound: &InboundRequest) -> Result<()> {
        let Some(id) = inbound.id() else {
            return Ok(());
        };
        self.core()
            .interactor()
            .respond_ack(&inbound.topic, id, &inbound.envelope)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inbound requests
    // ---------------------------------------------------------------------

    async fn handle_request(&self, inbound: InboundRequest) -> Result<()> {
        let method = inbound.request.method.clone();
        match method.as_str() {
            m if m == SESSION_PROPOSE.method => self.on_propose(inbound).await,
            m if m == SESSION_SETTLE.method => self.on_settle(inbound).await,
            m => {
                let Some(session) = self.get_session(&inbound.topic)? else {
                    debug!(topic = %inbound.topic, method = m, "request for unknown session");
                    return Ok(());
                };
                match m {
                    _ if m == SESSION_UPDATE.method => self.on_update(inbound, session).await,
                    _ if m == SESSION_EXTEND.method => self.on_extend(inbound, session).await,
                    _ if m == SESSION_REQUEST.method => self.on_request(inbound, session).await,
                    _ if m == SESSION_EVENT.method => self.on_event(inbound, session).await,
                    _ if m == SESSION_DELETE.method => self.on_delete(inbound).await,
                    _ if m == SESSION_PING.method => {
                        self.reply_ok(&inbound).await?;
                        self.emit(SignEvent::SessionPinged {
                            topic: inbound.topic,
                        });
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    async fn on_propose(&self, inbound: InboundRequest) -> Result<()> {
        if self.core().pairing().get_pairing(&inbound.topic)?.is_none() {
            debug!(topic = %inbound.topic, "proposal on unknown pairing");
            return Ok(());
        }
        let Some(id) = inbound.id().cloned() else {
            return Ok(());
        };
        let params = match inbound.request.params_as::<SessionProposeParams>() {
            Ok(params) => params,
            Err(e) => {
                let reason = Reason::invalid_method().with_message(format!("malformed proposal: {}", e));
                return self.proposal_error(&inbound, reason).await;
            }
        };
        let checked = validate_proposal_namespaces(&params.required_namespaces).and_then(|_| {
            params
                .optional_namespaces
                .as_ref()
                .map_or(Ok(()), validate_proposal_namespaces)
        });
        if let Err(e) = checked {
            return self.proposal_error(&inbound, e.reason()).await;
        }
        if AgreementPublicKey::from_hex(&params.proposer.public_key).is_err() {
            let reason = Reason::invalid_method().with_message("malformed proposer public key");
            return self.proposal_error(&inbound, reason).await;
        }

        let proposal = Proposal::new(id, inbound.topic.clone(), Origin::Remote, params, unix_now());
        self.inner
            .proposals
            .set(proposal.proposer_public_key(), &proposal)?;
        info!(topic = %inbound.topic, "session proposal received");
        self.emit(SignEvent::SessionProposal(proposal));
        Ok(())
    }

    async fn proposal_error(&self, inbound: &InboundRequest, reason: Reason) -> Result<()> {
        self.reply_error(inbound, reason.clone()).await?;
        self.emit(SignEvent::ProposalError {
            topic: inbound.topic.clone(),
            reason,
        });
        Ok(())
    }

    async fn on_settle(&self, inbound: InboundRequest) -> Result<()> {
        let topic = inbound.topic.clone();
        let proposal = self
            .inner
            .proposals
            .get_all()?
            .into_iter()
            .find(|p| p.origin == Origin::Local && p.session_topic.as_ref() == Some(&topic));
        let Some(proposal) = proposal else {
            return self
                .reply_error(&inbound, Reason::invalid_session_settle_request())
                .await;
        };
        let params = match inbound.request.params_as::<SessionSettleParams>() {
            Ok(params) => params,
            Err(_) => {
                return self
                    .reply_error(&inbound, Reason::invalid_session_settle_request())
                    .await
            }
        };
        let controller_matches = proposal
            .responder_public_key
            .as_deref()
            .is_some_and(|key| key.eq_ignore_ascii_case(&params.controller.public_key));
        if !controller_matches {
            warn!(%topic, "settle names a controller other than the responder");
            return self
                .reply_error(&inbound, Reason::invalid_session_settle_request())
                .await;
        }
        let checked = validate_session_namespaces(&params.namespaces)
            .and_then(|_| validate_approval(&proposal.params.required_namespaces, &params.namespaces));
        if let Err(e) = checked {
            return self.reply_error(&inbound, e.reason()).await;
        }
        let now = unix_now();
        if params.expiry <= now {
            return self
                .reply_error(&inbound, Reason::invalid_session_settle_request())
                .await;
        }

        let session = Session {
            topic: topic.clone(),
            pairing_topic: proposal.pairing_topic.clone(),
            relay: params.relay,
            self_participant: proposal.params.proposer.clone(),
            controller: params.controller.public_key.clone(),
            peer_participant: params.controller,
            namespaces: params.namespaces,
            required_namespaces: proposal.params.required_namespaces.clone(),
            optional_namespaces: proposal.params.optional_namespaces.clone(),
            session_properties: params.session_properties,
            expiry: params.expiry.min(now + SESSION_TTL),
            acknowledged: true,
        };
        self.inner.sessions.set(topic.as_str(), &session)?;
        self.reply_ok(&inbound).await?;
        self.drop_proposal(&proposal);

        if let Err(e) = self
            .core()
            .pairing()
            .activate(&session.pairing_topic, Some(session.peer_participant.metadata.clone()))
        {
            warn!(topic = %session.pairing_topic, error = %e, "pairing activation failed");
        }
        info!(%topic, "session settled");
        self.emit(SignEvent::SessionSettled(session));
        Ok(())
    }

    async fn on_update(&self, inbound: InboundRequest, session: Session) -> Result<()> {
        if session.is_controller() {
            return self
                .reply_error(&inbound, Reason::unauthorized_update_request())
                .await;
        }
        let namespaces = match inbound.request.params_as::<SessionUpdateParams>() {
            Ok(params) => params.namespaces,
            Err(_) => return self.reply_error(&inbound, Reason::invalid_update_request()).await,
        };
        let checked = validate_session_namespaces(&namespaces)
            .and_then(|_| validate_approval(&session.required_namespaces, &namespaces));
        if let Err(e) = checked {
            return self
                .reply_error(&inbound, Reason::invalid_update_request().with_message(e.to_string()))
                .await;
        }
        let topic = inbound.topic.clone();
        self.inner.sessions.modify(topic.as_str(), |current| {
            if let Some(session) = current.as_mut() {
                session.namespaces = namespaces.clone();
            }
            Ok::<_, SignError>(())
        })?;
        self.reply_ok(&inbound).await?;
        self.emit(SignEvent::SessionUpdated { topic, namespaces });
        Ok(())
    }

    async fn on_extend(&self, inbound: InboundRequest, session: Session) -> Result<()> {
        if session.is_controller() {
            return self
                .reply_error(&inbound, Reason::unauthorized_extend_request())
                .await;
        }
        let Ok(params) = inbound.request.params_as::<SessionExtendParams>() else {
            return self.reply_error(&inbound, Reason::invalid_extend_request()).await;
        };
        let topic = inbound.topic.clone();
        let now = unix_now();
        let extended = self.inner.sessions.modify(topic.as_str(), |current| {
            let session = current
                .as_mut()
                .ok_or_else(|| SignError::NoSession(topic.to_string()))?;
            session.update_expiry_to(params.expiry, now)
        });
        match extended {
            Ok(expiry) => {
                self.reply_ok(&inbound).await?;
                self.emit(SignEvent::SessionExtended { topic, expiry });
                Ok(())
            }
            Err(_) => self.reply_error(&inbound, Reason::invalid_extend_request()).await,
        }
    }

    async fn on_request(&self, inbound: InboundRequest, session: Session) -> Result<()> {
        let Some(id) = inbound.id().cloned() else {
            return Ok(());
        };
        let Ok(params) = inbound.request.params_as::<SessionRequestParams>() else {
            return self.reply_error(&inbound, Reason::invalid_method()).await;
        };
        if !session.has_chain(&params.chain_id) {
            return self.reply_error(&inbound, Reason::unauthorized_chain()).await;
        }
        if !session.has_permission_for_method(&params.request.method, &params.chain_id) {
            return self.reply_error(&inbound, Reason::unauthorized_method()).await;
        }
        if params
            .request
            .expiry_timestamp
            .is_some_and(|expiry| expiry <= unix_now())
        {
            return self.reply_error(&inbound, Reason::request_expired()).await;
        }
        debug!(topic = %inbound.topic, %id, method = %params.request.method, "session request received");
        self.emit(SignEvent::SessionRequest(SessionRequest {
            topic: inbound.topic,
            id,
            chain_id: params.chain_id,
            request: params.request,
        }));
        Ok(())
    }

    async fn on_event(&self, inbound: InboundRequest, session: Session) -> Result<()> {
        let Ok(params) = inbound.request.params_as::<SessionEventParams>() else {
            return self.reply_error(&inbound, Reason::invalid_event()).await;
        };
        if !session.has_chain(&params.chain_id) {
            return self.reply_error(&inbound, Reason::unauthorized_chain()).await;
        }
        if !session.has_permission_for_event(&params.event.name, &params.chain_id) {
            return self.reply_error(&inbound, Reason::unauthorized_event()).await;
        }
        self.reply_ok(&inbound).await?;
        self.emit(SignEvent::SessionEvent {
            topic: inbound.topic,
            chain_id: params.chain_id,
            event: params.event,
        });
        Ok(())
    }

    async fn on_delete(&self, inbound: InboundRequest) -> Result<()> {
        let reason = inbound
            .request
            .params_as::<Reason>()
            .unwrap_or_else(|_| Reason::user_disconnected());
        self.reply_ok(&inbound).await?;
        let topic = inbound.topic;
        if self.remove_session(&topic).await?.is_some() {
            info!(%topic, code = reason.code, "peer deleted session");
            self.emit(SignEvent::SessionDeleted { topic, reason });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inbound responses
    // ---------------------------------------------------------------------

    async fn handle_response(&self, inbound: InboundResponse) -> Result<()> {
        let method = inbound.request.method.clone();
        match method.as_str() {
            m if m == SESSION_PROPOSE.method => self.on_propose_response(inbound).await,
            m if m == SESSION_SETTLE.method => self.on_settle_response(inbound).await,
            m if m == SESSION_REQUEST.method => {
                let params: SessionRequestParams = inbound.request.params_as()?;
                self.emit(SignEvent::SessionResponse(SessionResponse {
                    topic: inbound.topic,
                    chain_id: params.chain_id,
                    request: params.request,
                    response: inbound.response,
                }));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_propose_response(&self, inbound: InboundResponse) -> Result<()> {
        let params: SessionProposeParams = inbound.request.params_as()?;
        let key = params.proposer.public_key;
        let Some(proposal) = self.inner.proposals.get(&key)? else {
            debug!(%key, "response to unknown proposal");
            return Ok(());
        };

        let answer = match inbound.response.result_as::<SessionProposeResponse>() {
            Ok(answer) => answer,
            Err(error) => {
                let reason = Reason::from(error);
                info!(%key, code = reason.code, "proposal rejected");
                self.drop_proposal(&proposal);
                self.emit(SignEvent::ProposalRejected {
                    proposer_public_key: key,
                    reason,
                });
                return Ok(());
            }
        };

        let kms = self.core().kms();
        let self_key = AgreementPublicKey::from_hex(&key)?;
        let secret = kms.perform_key_agreement(&self_key, &answer.responder_public_key)?;
        let topic = secret.derive_topic();
        kms.set_agreement_secret(&secret, &topic)?;
        self.inner.proposals.modify(&key, |current| {
            if let Some(proposal) = current.as_mut() {
                proposal.session_topic = Some(topic.clone());
                proposal.responder_public_key = Some(answer.responder_public_key.clone());
            }
            Ok::<_, SignError>(())
        })?;
        debug!(%topic, "session topic derived");
        self.core().interactor().subscribe(&topic).await?;
        Ok(())
    }

    async fn on_settle_response(&self, inbound: InboundResponse) -> Result<()> {
        let topic = inbound.topic;
        match inbound.response.outcome {
            RpcResult::Result(_) => {
                let session = self.inner.sessions.modify(topic.as_str(), |current| {
                    Ok::<_, SignError>(current.as_mut().map(|session| {
                        session.acknowledged = true;
                        session.clone()
                    }))
                })?;
                if let Some(session) = session {
                    info!(%topic, "session settled");
                    self.emit(SignEvent::SessionSettled(session));
                }
            }
            RpcResult::Error(error) => {
                let reason = Reason::from(error);
                warn!(%topic, code = reason.code, "peer refused settlement");
                if self.remove_session(&topic).await?.is_some() {
                    self.emit(SignEvent::SessionDeleted { topic, reason });
                }
            }
        }
        Ok(())
    }

    fn spawn_request_handler(&self) -> JoinHandle<()> {
        let mut requests = self.core().interactor().request_subscription(&REQUEST_METHODS);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(inbound) = requests.recv().await {
                let Some(engine) = upgrade(&weak) else { break };
                let method = inbound.request.method.clone();
                if let Err(e) = engine.handle_request(inbound).await {
                    warn!(%method, error = %e, "session request handling failed");
                }
            }
        })
    }

    fn spawn_response_handler(&self) -> JoinHandle<()> {
        let mut responses = self.core().interactor().response_subscription(&RESPONSE_METHODS);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(inbound) = responses.recv().await {
                let Some(engine) = upgrade(&weak) else { break };
                let method = inbound.request.method.clone();
                if let Err(e) = engine.handle_response(inbound).await {
                    warn!(%method, error = %e, "session response handling failed");
                }
            }
        })
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<SignEngine> {
    weak.upgrade().map(|inner| SignEngine { inner })
}
