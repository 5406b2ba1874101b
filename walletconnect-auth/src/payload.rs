//! Authentication request payloads and their EIP-4361 rendering.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use walletconnect_core::{Account, Blockchain, Participant};

use crate::recap::{find_recap, is_recap, Recap};
use crate::AuthError;

pub const PAYLOAD_TYPE: &str = "caip122";
pub const SIWE_VERSION: &str = "1";

/// What an application asks to be signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequestParams {
    pub chains: Vec<Blockchain>,
    pub domain: String,
    pub nonce: String,
    /// Audience, the URI the signature is bound to.
    pub uri: String,
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
    /// Methods to request as an `eip155` `request/*` recap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

impl AuthRequestParams {
    pub fn new(
        domain: impl Into<String>,
        uri: impl Into<String>,
        nonce: impl Into<String>,
        chains: Vec<Blockchain>,
    ) -> Self {
        Self {
            chains,
            domain: domain.into(),
            nonce: nonce.into(),
            uri: uri.into(),
            nbf: None,
            exp: None,
            statement: None,
            request_id: None,
            resources: None,
            methods: None,
        }
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = Some(resources);
        self
    }
}

/// The CAIP-122 payload sent in `wc_sessionAuthenticate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub chains: Vec<Blockchain>,
    pub domain: String,
    pub aud: String,
    pub nonce: String,
    pub version: String,
    /// RFC 3339.
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

impl AuthPayload {
    /// Build the payload issued at `issued_at`. Requested methods become an
    /// `eip155` recap merged with any recap already in the resources.
    pub fn from_params(params: AuthRequestParams, issued_at: DateTime<Utc>) -> Result<Self, AuthError> {
        if params.chains.is_empty() {
            return Err(AuthError::InvalidPayload("at least one chain is required".into()));
        }
        if params.domain.is_empty() || params.nonce.is_empty() || params.uri.is_empty() {
            return Err(AuthError::InvalidPayload("domain, uri and nonce are required".into()));
        }
        for ts in [&params.nbf, &params.exp].into_iter().flatten() {
            parse_time(ts)?;
        }

        let mut resources = params.resources.unwrap_or_default();
        if let Some(methods) = params.methods.filter(|m| !m.is_empty()) {
            let mut recap = find_recap(&resources)?.unwrap_or_default();
            recap.merge(&Recap::new("eip155", "request", &methods));
            resources.retain(|r| !is_recap(r));
            resources.push(recap.to_urn()?);
        }

        Ok(Self {
            payload_type: PAYLOAD_TYPE.to_string(),
            chains: params.chains,
            domain: params.domain,
            aud: params.uri,
            nonce: params.nonce,
            version: SIWE_VERSION.to_string(),
            iat: issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            nbf: params.nbf,
            exp: params.exp,
            statement: params.statement,
            request_id: params.request_id,
            resources: (!resources.is_empty()).then_some(resources),
        })
    }

    /// Expiry in unix seconds, if the payload carries one.
    pub fn expiry(&self) -> Result<Option<i64>, AuthError> {
        self.exp.as_deref().map(|e| parse_time(e).map(|t| t.timestamp())).transpose()
    }

    pub fn recap(&self) -> Result<Option<Recap>, AuthError> {
        find_recap(self.resources.as_deref().unwrap_or_default())
    }

    /// The statement as signed: the application's statement followed by the
    /// recap statement, when there is a recap.
    pub fn full_statement(&self) -> Result<Option<String>, AuthError> {
        let recap = self.recap()?.map(|r| r.statement());
        Ok(match (self.statement.as_deref(), recap) {
            (Some(s), Some(r)) => Some(format!("{} {}", s, r)),
            (Some(s), None) => Some(s.to_string()),
            (None, r) => r,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AuthError::InvalidPayload(format!("bad timestamp {:?}: {}", value, e)))
}

/// `{publicKey, metadata}` of the requester plus the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAuthenticateParams {
    pub auth_payload: AuthPayload,
    pub requester: Participant,
    pub expiry_timestamp: i64,
}

/// Render the EIP-4361 message `account` signs for `payload`.
pub fn format_message(payload: &AuthPayload, account: &Account) -> Result<String, AuthError> {
    let chain = account.blockchain();
    let wallet = if chain.namespace() == "eip155" {
        "Ethereum".to_string()
    } else {
        chain.namespace().to_string()
    };

    let mut lines = vec![
        format!("{} wants you to sign in with your {} account:", payload.domain, wallet),
        account.address().to_string(),
        String::new(),
    ];
    if let Some(statement) = payload.full_statement()? {
        lines.push(statement);
        lines.push(String::new());
    }
    lines.push(format!("URI: {}", payload.aud));
    lines.push(format!("Version: {}", payload.version));
    lines.push(format!("Chain ID: {}", chain.reference()));
    lines.push(format!("Nonce: {}", payload.nonce));
    lines.push(format!("Issued At: {}", payload.iat));
    if let Some(exp) = &payload.exp {
        lines.push(format!("Expiration Time: {}", exp));
    }
    if let Some(nbf) = &payload.nbf {
        lines.push(format!("Not Before: {}", nbf));
    }
    if let Some(request_id) = &payload.request_id {
        lines.push(format!("Request ID: {}", request_id));
    }
    if let Some(resources) = payload.resources.as_ref().filter(|r| !r.is_empty()) {
        lines.push("Resources:".to_string());
        lines.extend(resources.iter().map(|r| format!("- {}", r)));
    }
    Ok(lines.join("\n"))
}
