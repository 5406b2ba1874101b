//! Per-key mutual exclusion.
//!
//! Stores serialize read-modify-write of a single record (a topic's key, a
//! request id's history entry) without holding one global lock across the
//! whole operation. The map lock is only held while fetching the key's mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mutex guarding `key`. Callers lock it for the duration of their update.
    pub(crate) fn get(&self, key: &str) -> Arc<Mutex<()>> {
        // A poisoned map only means another caller panicked mid-insert; the
        // map itself is still consistent.
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
