//! Key agreement and key storage.
//!
//! Private keys are persisted by public key; derived secrets and symmetric
//! keys by topic. All storage goes through the injected
//! [`SecureKeyStorage`](crate::secure_storage::SecureKeyStorage).

mod keys;
mod kms;

pub use keys::{AgreementPrivateKey, AgreementPublicKey, AgreementSecret, SymmetricKey, KEY_LENGTH};
pub use kms::KeyManagementService;

use crate::secure_storage::SecureStorageError;

/// Errors from key handling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    /// No key material stored for the given public key or topic.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("secure storage error: {0}")]
    Storage(#[from] SecureStorageError),
}
