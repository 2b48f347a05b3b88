//! Per-key locks.
//!
//! Every mutation of a group (adding, releasing, expiring) happens while
//! holding the lock for its key, so completion and expiry of the same group
//! never overlap. Different keys never contend.
//!
//! The registry only keeps entries for keys that are locked or waited on;
//! the last guard for a key removes its entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::correlation::CorrelationKey;

type Entries = HashMap<CorrelationKey, Arc<AsyncMutex<()>>>;

/// Hands out one async mutex per correlation key.
#[derive(Clone, Default)]
pub struct LockRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &CorrelationKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.entries
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Waits for and acquires the lock for `key`.
    pub async fn lock(&self, key: &CorrelationKey) -> GroupLock {
        let mutex = self.entry(key);
        let guard = mutex.lock_owned().await;
        GroupLock {
            key: key.clone(),
            guard: Some(guard),
            entries: Arc::clone(&self.entries),
        }
    }

    /// Acquires the lock for `key` only if it is free right now.
    pub fn try_lock(&self, key: &CorrelationKey) -> Option<GroupLock> {
        let mutex = self.entry(key);
        match mutex.try_lock_owned() {
            Ok(guard) => Some(GroupLock {
                key: key.clone(),
                guard: Some(guard),
                entries: Arc::clone(&self.entries),
            }),
            Err(_) => {
                release_entry(&self.entries, key);
                None
            }
        }
    }

    /// Returns `true` if the lock for `key` is currently held.
    pub fn is_locked(&self, key: &CorrelationKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Returns the number of keys that are locked or waited on.
    pub fn active_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

/// Drops the registry entry for `key` once nobody but the registry holds it.
fn release_entry(entries: &Mutex<Entries>, key: &CorrelationKey) {
    let mut entries = entries.lock();
    if entries
        .get(key)
        .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
    {
        entries.remove(key);
    }
}

/// Holds the lock for one correlation key until dropped.
pub struct GroupLock {
    key: CorrelationKey,
    guard: Option<OwnedMutexGuard<()>>,
    entries: Arc<Mutex<Entries>>,
}

impl GroupLock {
    /// Returns the locked key.
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl Drop for GroupLock {
    fn drop(&mut self) {
        // the guard holds a strong reference to the mutex; release it first
        self.guard.take();
        release_entry(&self.entries, &self.key);
    }
}

impl std::fmt::Debug for GroupLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupLock").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_lock_fails_while_held() {
        let registry = LockRegistry::new();
        let key = CorrelationKey::from("a");

        let held = registry.lock(&key).await;
        assert!(registry.is_locked(&key));
        assert!(registry.try_lock(&key).is_none());
        assert!(registry.try_lock(&"b".into()).is_some());

        drop(held);
        assert!(!registry.is_locked(&key));
        assert!(registry.try_lock(&key).is_some());
    }

    #[test]
    fn test_lock_is_pending_while_held() {
        let registry = LockRegistry::new();
        let key = CorrelationKey::from("a");
        let held = tokio_test::block_on(registry.lock(&key));

        let mut waiting = tokio_test::task::spawn(registry.lock(&key));
        tokio_test::assert_pending!(waiting.poll());
        drop(held);
        assert!(waiting.is_woken());
        let acquired = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(acquired.key(), &key);
    }

    #[tokio::test]
    async fn test_entries_are_removed_when_unused() {
        let registry = LockRegistry::new();
        {
            let _a = registry.lock(&"a".into()).await;
            let _b = registry.lock(&"b".into()).await;
            assert_eq!(registry.active_keys(), 2);
        }
        assert_eq!(registry.active_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiter_acquires_after_release() {
        let registry = LockRegistry::new();
        let key = CorrelationKey::from("a");
        let held = registry.lock(&key).await;

        let waiter = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _lock = registry.lock(&key).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.active_keys(), 0);
    }
}
