use walletconnect_core::{Blockchain, Reason, RpcId, RpcResponse, Topic};

use crate::namespaces::SessionNamespaces;
use crate::params::{Event, Request};
use crate::session::{Proposal, Session};

/// A peer's application request, waiting for [`SignEngine::respond`](crate::SignEngine::respond).
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRequest {
    pub topic: Topic,
    /// Id to answer with.
    pub id: RpcId,
    pub chain_id: Blockchain,
    pub request: Request,
}

/// The peer's answer to one of our requests.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionResponse {
    pub topic: Topic,
    pub chain_id: Blockchain,
    pub request: Request,
    pub response: RpcResponse,
}

/// Everything the sign engine reports to the application.
#[derive(Clone, Debug, PartialEq)]
pub enum SignEvent {
    /// A dApp proposed a session (wallet side).
    SessionProposal(Proposal),
    /// The wallet rejected our proposal (dApp side).
    ProposalRejected {
        proposer_public_key: String,
        reason: Reason,
    },
    /// An inbound proposal was malformed and has been answered with an error.
    ProposalError { topic: Topic, reason: Reason },
    SessionSettled(Session),
    SessionUpdated {
        topic: Topic,
        namespaces: SessionNamespaces,
    },
    SessionExtended { topic: Topic, expiry: i64 },
    SessionRequest(SessionRequest),
    SessionResponse(SessionResponse),
    SessionEvent {
        topic: Topic,
        chain_id: Blockchain,
        event: Event,
    },
    SessionDeleted { topic: Topic, reason: Reason },
    SessionExpired { topic: Topic },
    SessionPinged { topic: Topic },
}
