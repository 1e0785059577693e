//! Key lock table
//!
//! A fixed pool of async mutexes. A key always maps to the same entry, so
//! every writer of a credential (foreground requests and the ticker alike)
//! serializes on it. Distinct keys may share an entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use horizon_core::CredentialKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{RotationError, RotationResult};

/// Fixed-size table of per-key locks
#[derive(Debug)]
pub struct KeyLockTable {
    entries: Vec<Arc<Mutex<()>>>,
}

/// Handle to the lock entry of one key
#[derive(Debug, Clone)]
pub struct KeyLock {
    index: usize,
    entry: Arc<Mutex<()>>,
}

/// Held lock entry; released on drop
///
/// Not reentrant: acquiring the same entry again on the same task while
/// holding this guard deadlocks.
#[derive(Debug)]
pub struct KeyLockGuard {
    index: usize,
    _guard: OwnedMutexGuard<()>,
}

impl KeyLockTable {
    /// Create a table with `size` entries (at least one)
    pub fn new(size: usize) -> Self {
        let entries = (0..size.max(1)).map(|_| Arc::new(Mutex::new(()))).collect();
        Self { entries }
    }

    /// Number of lock entries
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Index of the entry `key` maps to
    pub fn index_of(&self, key: &CredentialKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.as_str().hash(&mut hasher);
        (hasher.finish() % self.entries.len() as u64) as usize
    }

    /// Lock entry for `key`
    pub fn lock_for(&self, key: &CredentialKey) -> KeyLock {
        let index = self.index_of(key);
        KeyLock {
            index,
            entry: Arc::clone(&self.entries[index]),
        }
    }

    /// Acquire the entry for `key`, failing with `LockTimeout` after `timeout`
    pub async fn acquire(
        &self,
        key: &CredentialKey,
        timeout: Duration,
    ) -> RotationResult<KeyLockGuard> {
        self.lock_for(key)
            .acquire_timeout(timeout)
            .await
            .ok_or_else(|| RotationError::LockTimeout {
                key: key.clone(),
                timeout,
            })
    }

    /// Whether `guard` holds the entry `key` maps to
    pub fn guards(&self, guard: &KeyLockGuard, key: &CredentialKey) -> bool {
        guard.index == self.index_of(key)
    }
}

impl KeyLock {
    /// Table index of this entry
    pub fn index(&self) -> usize {
        self.index
    }

    /// Wait for the entry
    pub async fn acquire(&self) -> KeyLockGuard {
        KeyLockGuard {
            index: self.index,
            _guard: Arc::clone(&self.entry).lock_owned().await,
        }
    }

    /// Wait for the entry at most `timeout`
    pub async fn acquire_timeout(&self, timeout: Duration) -> Option<KeyLockGuard> {
        tokio::time::timeout(timeout, self.acquire()).await.ok()
    }

    /// Take the entry only if it is free
    pub fn try_acquire(&self) -> Option<KeyLockGuard> {
        Arc::clone(&self.entry)
            .try_lock_owned()
            .ok()
            .map(|guard| KeyLockGuard {
                index: self.index,
                _guard: guard,
            })
    }
}

impl KeyLockGuard {
    /// Table index of the held entry
    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(s: &str) -> CredentialKey {
        CredentialKey::new(s).unwrap()
    }

    #[test]
    fn mapping_is_deterministic() {
        let table = KeyLockTable::new(64);
        for name in ["prod", "staging", "role_a", "x.y-z"] {
            let k = key(name);
            assert_eq!(table.index_of(&k), table.index_of(&k));
            assert!(table.index_of(&k) < 64);
        }
    }

    #[test]
    fn single_entry_table_shares_everything() {
        let table = KeyLockTable::new(0);
        assert_eq!(table.size(), 1);
        assert_eq!(table.index_of(&key("a")), table.index_of(&key("b")));
    }

    #[tokio::test]
    async fn entry_is_exclusive_until_dropped() {
        let table = KeyLockTable::new(8);
        let k = key("prod");

        let guard = table.acquire(&k, Duration::from_secs(1)).await.unwrap();
        assert!(table.guards(&guard, &k));
        assert!(table.lock_for(&k).try_acquire().is_none());

        drop(guard);
        assert!(table.lock_for(&k).try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn contended_acquire_times_out() {
        let table = KeyLockTable::new(8);
        let k = key("prod");
        let _held = table.lock_for(&k).acquire().await;

        let err = table.acquire(&k, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, RotationError::LockTimeout { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn holders_never_overlap() {
        let table = Arc::new(KeyLockTable::new(4));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let table = Arc::clone(&table);
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let _guard = table.lock_for(&key("shared")).acquire().await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
