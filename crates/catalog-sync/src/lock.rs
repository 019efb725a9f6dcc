use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::now_epoch_secs;
use crate::kv::KvStore;
use crate::store::StoreError;

/// Age past which a held lock is presumed abandoned.
pub const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(600);

/// Mutual exclusion for sync runs, stored as a timestamped flag in a
/// [`KvStore`].
///
/// Acquisition is only as atomic as the backing store's `set_if_absent`.
pub struct SyncLock {
    kv: Arc<dyn KvStore>,
    owner: String,
}

/// What `is_held` reports about a lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    pub held: bool,
    pub age_secs: u64,
}

impl LockState {
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.held && self.age_secs >= threshold.as_secs()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    owner: String,
    acquired_at: u64,
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

impl SyncLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let seq = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        Self {
            kv,
            owner: format!("{}-{}-{seq}", std::process::id(), now_epoch_secs()),
        }
    }

    fn record(&self) -> Result<String, StoreError> {
        serde_json::to_string(&LockRecord {
            owner: self.owner.clone(),
            acquired_at: now_epoch_secs(),
        })
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn read(&self, key: &str) -> Result<Option<LockRecord>, StoreError> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        // An unreadable record still counts as held; age falls back to zero.
        Ok(Some(serde_json::from_str(&raw).unwrap_or(LockRecord {
            owner: String::new(),
            acquired_at: now_epoch_secs(),
        })))
    }

    /// Take the lock if nobody holds it. The lock expires after `ttl` even if
    /// never released.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let acquired = self.kv.set_if_absent(key, &self.record()?, Some(ttl))?;
        if acquired {
            tracing::debug!(key, owner = %self.owner, "sync lock acquired");
        }
        Ok(acquired)
    }

    /// Take the lock unconditionally, replacing any current holder.
    pub fn acquire_forced(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(previous) = self.read(key)? {
            tracing::warn!(
                key,
                previous_owner = %previous.owner,
                age_secs = now_epoch_secs().saturating_sub(previous.acquired_at),
                "forcing sync lock over an existing holder"
            );
        }
        self.kv.set(key, &self.record()?, Some(ttl))
    }

    pub fn is_held(&self, key: &str) -> Result<LockState, StoreError> {
        Ok(match self.read(key)? {
            Some(record) => LockState {
                held: true,
                age_secs: now_epoch_secs().saturating_sub(record.acquired_at),
            },
            None => LockState {
                held: false,
                age_secs: 0,
            },
        })
    }

    /// Release the lock if this instance holds it. A lock taken over by a
    /// forced run is left alone and `false` is returned. An absent lock
    /// counts as released.
    pub fn release(&self, key: &str) -> Result<bool, StoreError> {
        match self.read(key)? {
            Some(record) if record.owner == self.owner => {
                self.kv.delete(key)?;
                Ok(true)
            }
            Some(record) => {
                tracing::debug!(key, holder = %record.owner, "lock held by another owner; not releasing");
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Clear the lock regardless of who holds it or how old it is.
    pub fn force_release(&self, key: &str) -> Result<(), StoreError> {
        tracing::info!(key, "force-releasing sync lock");
        self.kv.delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    const TTL: Duration = Duration::from_secs(3600);

    #[test]
    fn second_acquire_fails_while_held() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let first = SyncLock::new(Arc::clone(&kv));
        let second = SyncLock::new(kv);

        assert!(first.try_acquire("lock", TTL).unwrap());
        assert!(!second.try_acquire("lock", TTL).unwrap());

        first.release("lock").unwrap();
        assert!(second.try_acquire("lock", TTL).unwrap());
    }

    #[test]
    fn release_by_non_owner_is_a_no_op() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let owner = SyncLock::new(Arc::clone(&kv));
        let other = SyncLock::new(kv);

        owner.try_acquire("lock", TTL).unwrap();
        assert!(!other.release("lock").unwrap());
        assert!(owner.is_held("lock").unwrap().held);
        assert!(owner.release("lock").unwrap());
    }

    #[test]
    fn old_lock_reports_stale_and_force_release_clears_it() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let record = format!(
            r#"{{"owner":"dead-process","acquired_at":{}}}"#,
            now_epoch_secs() - 900
        );
        kv.set("lock", &record, Some(TTL)).unwrap();

        let lock = SyncLock::new(kv);
        let state = lock.is_held("lock").unwrap();
        assert!(state.held);
        assert!(state.age_secs >= 900);
        assert!(state.is_stale(DEFAULT_STALE_LOCK));

        lock.force_release("lock").unwrap();
        assert!(!lock.is_held("lock").unwrap().held);
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let lock = SyncLock::new(kv);
        lock.try_acquire("lock", TTL).unwrap();
        assert!(!lock.is_held("lock").unwrap().is_stale(DEFAULT_STALE_LOCK));
    }

    #[test]
    fn forced_acquire_replaces_holder() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let first = SyncLock::new(Arc::clone(&kv));
        let forced = SyncLock::new(kv);

        first.try_acquire("lock", TTL).unwrap();
        forced.acquire_forced("lock", TTL).unwrap();

        // The original holder no longer owns the lock.
        assert!(!first.release("lock").unwrap());
        assert!(forced.is_held("lock").unwrap().held);

        assert!(forced.release("lock").unwrap());
        assert!(!forced.is_held("lock").unwrap().held);
    }

    #[test]
    fn expired_lock_can_be_reacquired() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let first = SyncLock::new(Arc::clone(&kv));
        let second = SyncLock::new(kv);

        assert!(first.try_acquire("lock", Duration::ZERO).unwrap());
        assert!(second.try_acquire("lock", TTL).unwrap());
    }
}
