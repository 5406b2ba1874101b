//! CACAO: the signed form of an [`AuthPayload`].
//!
//! Signing and verification belong to the host application (they need the
//! chain's key material or an RPC node), so both are traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use walletconnect_core::Account;

use crate::payload::{format_message, AuthPayload, PAYLOAD_TYPE};
use crate::AuthError;

const DID_PKH_PREFIX: &str = "did:pkh:";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacaoHeader {
    /// Always `eip4361` (also used for `caip122`).
    pub t: String,
}

impl Default for CacaoHeader {
    fn default() -> Self {
        Self { t: "eip4361".into() }
    }
}

/// The payload as signed, with the signer identified by a `did:pkh` issuer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacaoPayload {
    pub iss: String,
    pub domain: String,
    pub aud: String,
    pub version: String,
    pub nonce: String,
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
}

impl CacaoPayload {
    pub fn new(payload: &AuthPayload, account: &Account) -> Self {
        Self {
            iss: format!("{}{}", DID_PKH_PREFIX, account),
            domain: payload.domain.clone(),
            aud: payload.aud.clone(),
            version: payload.version.clone(),
            nonce: payload.nonce.clone(),
            iat: payload.iat.clone(),
            nbf: payload.nbf.clone(),
            exp: payload.exp.clone(),
            statement: payload.statement.clone(),
            request_id: payload.request_id.clone(),
            resources: payload.resources.clone(),
        }
    }

    /// The account named by `iss`.
    pub fn account(&self) -> Result<Account, AuthError> {
        self.iss
            .strip_prefix(DID_PKH_PREFIX)
            .ok_or_else(|| AuthError::InvalidCacao(format!("issuer {} is not did:pkh", self.iss)))?
            .parse()
            .map_err(|e| AuthError::InvalidCacao(format!("issuer {}: {}", self.iss, e)))
    }

    /// Back to the request payload for the chain of the issuing account.
    fn as_auth_payload(&self, account: &Account) -> AuthPayload {
        AuthPayload {
            payload_type: PAYLOAD_TYPE.into(),
            chains: vec![account.blockchain().clone()],
            domain: self.domain.clone(),
            aud: self.aud.clone(),
            nonce: self.nonce.clone(),
            version: self.version.clone(),
            iat: self.iat.clone(),
            nbf: self.nbf.clone(),
            exp: self.exp.clone(),
            statement: self.statement.clone(),
            request_id: self.request_id.clone(),
            resources: self.resources.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacaoSignature {
    /// Signature scheme, e.g. `eip191` or `eip1271`.
    pub t: String,
    pub s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cacao {
    pub h: CacaoHeader,
    pub p: CacaoPayload,
    pub s: CacaoSignature,
}

impl Cacao {
    /// The exact text that was signed.
    pub fn message(&self) -> Result<String, AuthError> {
        let account = self.p.account()?;
        format_message(&self.p.as_auth_payload(&account), &account)
    }

    /// Check that this cacao answers `request`: same domain, audience and
    /// nonce, and an issuer on one of the requested chains.
    pub fn matches(&self, request: &AuthPayload) -> Result<(), AuthError> {
        let mismatch = |field: &str| AuthError::InvalidCacao(format!("{} does not match the request", field));
        if self.p.domain != request.domain {
            return Err(mismatch("domain"));
        }
        if self.p.aud != request.aud {
            return Err(mismatch("aud"));
        }
        if self.p.nonce != request.nonce {
            return Err(mismatch("nonce"));
        }
        let account = self.p.account()?;
        if !request.chains.contains(account.blockchain()) {
            return Err(mismatch("chain"));
        }
        Ok(())
    }
}

/// Produces signatures over SIWE messages, typically backed by a wallet key.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    async fn sign(&self, message: &str, account: &Account) -> Result<CacaoSignature, AuthError>;
}

/// Checks cacao signatures. EIP-1271 verification needs a chain RPC, so this
/// is left to the host.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, cacao: &Cacao, message: &str) -> Result<bool, AuthError>;
}

/// Build and sign the cacao `account` returns for `payload`.
pub async fn sign_cacao(
    payload: &AuthPayload,
    account: &Account,
    signer: &dyn MessageSigner,
) -> Result<Cacao, AuthError> {
    let message = format_message(payload, account)?;
    let signature = signer.sign(&message, account).await?;
    Ok(Cacao {
        h: CacaoHeader::default(),
        p: CacaoPayload::new(payload, account),
        s: signature,
    })
}
