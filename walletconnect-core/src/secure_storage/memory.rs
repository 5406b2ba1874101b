//! Process-local keychain for tests, benches and tools.
//!
//! Nothing is encrypted and nothing outlives the process. Entries are
//! zeroized when removed or overwritten.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use zeroize::Zeroizing;

use super::traits::{SecureKeyStorage, SecureStorageError, SecureStorageResult};

type Entries = HashMap<String, Zeroizing<Vec<u8>>>;

#[derive(Default)]
pub struct InMemoryKeyStorage {
    entries: RwLock<Entries>,
}

impl InMemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shared(&self) -> SecureStorageResult<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| SecureStorageError::Backend("keychain lock poisoned".into()))
    }

    fn exclusive(&self) -> SecureStorageResult<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|_| SecureStorageError::Backend("keychain lock poisoned".into()))
    }
}

impl SecureKeyStorage for InMemoryKeyStorage {
    fn add(&self, key: &str, bytes: &[u8]) -> SecureStorageResult<()> {
        self.exclusive()?
            .insert(key.to_owned(), Zeroizing::new(bytes.to_vec()));
        Ok(())
    }

    fn read(&self, key: &str) -> SecureStorageResult<Option<Vec<u8>>> {
        Ok(self.shared()?.get(key).map(|bytes| bytes.to_vec()))
    }

    fn delete(&self, key: &str) -> SecureStorageResult<()> {
        self.exclusive()?.remove(key);
        Ok(())
    }

    fn delete_all(&self) -> SecureStorageResult<()> {
        self.exclusive()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_storage::SecureKeyStorageExt;

    const SYM: &str = "symKey:7f2d9c";

    #[test]
    fn stored_key_reads_back() {
        let keychain = InMemoryKeyStorage::new();
        keychain.add(SYM, &[7u8; 32]).unwrap();
        assert_eq!(keychain.read(SYM).unwrap(), Some(vec![7u8; 32]));
        assert_eq!(keychain.len(), 1);
    }

    #[test]
    fn second_add_replaces_first() {
        let keychain = InMemoryKeyStorage::new();
        keychain.add(SYM, &[1u8; 32]).unwrap();
        keychain.add(SYM, &[2u8; 32]).unwrap();
        assert_eq!(keychain.read_required(SYM).unwrap(), vec![2u8; 32]);
        assert_eq!(keychain.len(), 1);
    }

    #[test]
    fn deleting_twice_is_fine() {
        let keychain = InMemoryKeyStorage::new();
        keychain.add(SYM, &[7u8; 32]).unwrap();
        keychain.delete(SYM).unwrap();
        keychain.delete(SYM).unwrap();
        assert_eq!(keychain.read(SYM).unwrap(), None);
        assert!(keychain.read_required(SYM).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_all_empties_the_keychain() {
        let keychain = InMemoryKeyStorage::new();
        keychain.add("privateKey:aa", &[1u8; 32]).unwrap();
        keychain.add(SYM, &[2u8; 32]).unwrap();
        keychain.delete_all().unwrap();
        assert!(keychain.is_empty());
        assert!(!keychain.contains(SYM).unwrap());
    }
}
