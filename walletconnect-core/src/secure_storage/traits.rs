//! The host-provided keychain contract.

/// Failure reported by a [`SecureKeyStorage`] backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecureStorageError {
    #[error("no key material under {0}")]
    NotFound(String),

    #[error("key material under {key} is unusable: {reason}")]
    InvalidKey { key: String, reason: String },

    /// The keychain is temporarily unavailable, e.g. the device is locked.
    #[error("keychain locked")]
    Locked,

    #[error("keychain backend failed: {0}")]
    Backend(String),
}

impl SecureStorageError {
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

pub type SecureStorageResult<T> = Result<T, SecureStorageError>;

/// Byte storage for private keys, agreement secrets and symmetric keys.
///
/// Entries are addressed by the strings the key management service builds
/// (`privateKey:<pub>`, `symKey:<topic>` and so on). Backends should encrypt
/// at rest and must never log the bytes they hold.
pub trait SecureKeyStorage: Send + Sync {
    /// Insert or replace.
    fn add(&self, key: &str, bytes: &[u8]) -> SecureStorageResult<()>;

    fn read(&self, key: &str) -> SecureStorageResult<Option<Vec<u8>>>;

    /// Removing a missing entry succeeds.
    fn delete(&self, key: &str) -> SecureStorageResult<()>;

    fn delete_all(&self) -> SecureStorageResult<()>;
}

pub trait SecureKeyStorageExt: SecureKeyStorage {
    fn read_required(&self, key: &str) -> SecureStorageResult<Vec<u8>> {
        match self.read(key)? {
            Some(bytes) => Ok(bytes),
            None => Err(SecureStorageError::NotFound(key.to_string())),
        }
    }

    fn contains(&self, key: &str) -> SecureStorageResult<bool> {
        self.read(key).map(|bytes| bytes.is_some())
    }
}

impl<S: SecureKeyStorage + ?Sized> SecureKeyStorageExt for S {}
