//! Secure key storage contract.
//!
//! Private keys, shared secrets and symmetric keys are handed to an injected
//! [`SecureKeyStorage`]. Hosts back it with the platform keychain; the
//! in-memory implementation here is for tests and tools.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use walletconnect_core::secure_storage::{InMemoryKeyStorage, SecureKeyStorage};
//!
//! let storage = InMemoryKeyStorage::new();
//! storage.add("privateKey:abcd", &secret)?;
//! let secret = storage.read("privateKey:abcd")?;
//! storage.delete("privateKey:abcd")?;
//! ```
//!
//! Key material is never logged and never written to the generic
//! key-value storage.

mod memory;
mod traits;

pub use memory::InMemoryKeyStorage;
pub use traits::{SecureKeyStorage, SecureKeyStorageExt, SecureStorageError, SecureStorageResult};
