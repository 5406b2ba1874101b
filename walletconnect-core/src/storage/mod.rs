//! Generic (non-secret) key-value storage.
//!
//! Pairings, sessions, proposals and the RPC history are persisted through a
//! host-supplied [`KeyValueStorage`]. Records are JSON documents; the typed
//! view is [`CodableStore`].

mod codable;
mod file;
mod memory;

pub use codable::CodableStore;
pub use file::FileStorage;
pub use memory::InMemoryStorage;

/// Errors from key-value storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage lock poisoned during {0}")]
    Lock(&'static str),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable key-value storage supplied by the host.
///
/// Values are JSON text. Operations are synchronous and expected to be cheap.
pub trait KeyValueStorage: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` under `key`, replacing any existing value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys starting with `prefix`, in no particular order.
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
