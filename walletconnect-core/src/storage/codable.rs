use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{KeyValueStorage, StorageError, StorageResult};
use crate::sync::KeyedLocks;

/// Typed view over a [`KeyValueStorage`], scoped to one key prefix.
///
/// Each record is stored under `"{prefix}:{id}"`. [`CodableStore::modify`]
/// gives atomic read-modify-write per id.
pub struct CodableStore<T> {
    storage: Arc<dyn KeyValueStorage>,
    prefix: String,
    locks: KeyedLocks,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CodableStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            locks: KeyedLocks::new(),
            _marker: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<T>> {
        match self.storage.get(&self.key(id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, id: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        self.storage.set(&self.key(id), &json)
    }

    pub fn delete(&self, id: &str) -> StorageResult<()> {
        self.storage.delete(&self.key(id))
    }

    pub fn contains(&self, id: &str) -> StorageResult<bool> {
        Ok(self.storage.get(&self.key(id))?.is_some())
    }

    /// Ids of all records in this store.
    pub fn ids(&self) -> StorageResult<Vec<String>> {
        let prefix = format!("{}:", self.prefix);
        Ok(self
            .storage
            .keys(&prefix)?
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .collect())
    }

    /// All records. Entries that no longer decode are skipped with a warning.
    pub fn get_all(&self) -> StorageResult<Vec<T>> {
        let mut values = Vec::new();
        for id in self.ids()? {
            match self.get(&id) {
                Ok(Some(value)) => values.push(value),
                Ok(None) => {}
                Err(StorageError::Serialization(e)) => {
                    tracing::warn!(store = %self.prefix, %id, error = %e, "skipping undecodable record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Atomically read, modify and write back the record `id`.
    ///
    /// `f` sees the current value (or `None`) and may replace it; leaving
    /// `None` deletes the record. If `f` fails nothing is written.
    pub fn modify<R, E>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Option<T>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StorageError>,
    {
        let lock = self.locks.get(id);
        let _guard = lock.lock().map_err(|_| StorageError::Lock("modify"))?;

        let mut current = self.get(id)?;
        let existed = current.is_some();
        let result = f(&mut current)?;
        match current {
            Some(value) => self.set(id, &value)?,
            None if existed => self.delete(id)?,
            None => {}
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        value: u32,
    }

    fn store() -> CodableStore<Item> {
        CodableStore::new(Arc::new(InMemoryStorage::new()), "item")
    }

    #[test]
    fn typed_roundtrip() {
        let store = store();
        store.set("a", &Item { value: 1 }).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Item { value: 1 }));
        assert_eq!(store.ids().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn prefixes_do_not_collide() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryStorage::new());
        let items: CodableStore<Item> = CodableStore::new(storage.clone(), "item");
        let others: CodableStore<Item> = CodableStore::new(storage, "itemx");
        items.set("a", &Item { value: 1 }).unwrap();
        others.set("b", &Item { value: 2 }).unwrap();
        assert_eq!(items.get_all().unwrap(), vec![Item { value: 1 }]);
    }

    #[test]
    fn modify_writes_and_deletes() {
        let store = store();
        store
            .modify::<_, StorageError>("a", |v| {
                assert!(v.is_none());
                *v = Some(Item { value: 7 });
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get("a").unwrap(), Some(Item { value: 7 }));

        store
            .modify::<_, StorageError>("a", |v| {
                *v = None;
                Ok(())
            })
            .unwrap();
        assert!(!store.contains("a").unwrap());
    }

    #[test]
    fn failed_modify_leaves_record_untouched() {
        let store = store();
        store.set("a", &Item { value: 1 }).unwrap();
        let result: Result<(), StorageError> = store.modify("a", |v| {
            *v = Some(Item { value: 2 });
            Err(StorageError::Lock("test"))
        });
        assert!(result.is_err());
        assert_eq!(store.get("a").unwrap(), Some(Item { value: 1 }));
    }

    #[test]
    fn get_all_skips_corrupt_records() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryStorage::new());
        storage.set("item:bad", "not json").unwrap();
        let store: CodableStore<Item> = CodableStore::new(storage, "item");
        store.set("good", &Item { value: 3 }).unwrap();
        assert_eq!(store.get_all().unwrap(), vec![Item { value: 3 }]);
    }
}
