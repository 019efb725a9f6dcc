use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::now_epoch_secs;
use crate::store::StoreError;

/// Shared key-value store with optional expiry.
///
/// Lock, progress, abort, and last-run state all live here so they can be
/// observed from outside the process running the sync. Expired entries read
/// as absent.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write `value` only if `key` is absent or expired. Returns whether the
    /// write happened. Atomic with respect to other callers of the same store.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Expiry timestamp for an entry written now with `ttl`.
pub fn expires_at(ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| now_epoch_secs().saturating_add(ttl.as_secs()))
}

/// Process-local `KvStore`.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Database(format!("kv mutex poisoned: {e}")))
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_epoch_secs();
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries()?.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: expires_at(ttl),
            },
        );
        Ok(())
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = now_epoch_secs();
        let mut entries = self.entries()?;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: expires_at(ttl),
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries()?.remove(key);
        Ok(())
    }
}
