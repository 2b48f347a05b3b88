use std::collections::HashMap;

use async_trait::async_trait;
use junction_core::Message;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ExpiryCallback, MessageGroupStore};
use crate::correlation::CorrelationKey;
use crate::error::{StoreError, StoreResult};
use crate::group::MessageGroup;
use crate::lock::LockRegistry;

/// In-memory message-group store.
///
/// With a group capacity, adding to a full group fails with
/// [`StoreError::CapacityExceeded`].
#[derive(Default)]
pub struct SimpleMessageStore {
    groups: RwLock<HashMap<CorrelationKey, MessageGroup>>,
    callbacks: RwLock<Vec<ExpiryCallback>>,
    locks: LockRegistry,
    group_capacity: Option<usize>,
    timeout_on_idle: bool,
}

impl SimpleMessageStore {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of messages per group.
    pub fn with_group_capacity(mut self, capacity: usize) -> Self {
        self.group_capacity = Some(capacity);
        self
    }

    /// Measures expiry from the last modification of a group.
    pub fn with_timeout_on_idle(mut self, timeout_on_idle: bool) -> Self {
        self.timeout_on_idle = timeout_on_idle;
        self
    }
}

#[async_trait]
impl MessageGroupStore for SimpleMessageStore {
    async fn get_message_group(&self, key: &CorrelationKey) -> StoreResult<MessageGroup> {
        Ok(self
            .groups
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| MessageGroup::new(key.clone())))
    }

    async fn add_message_to_group(
        &self,
        key: &CorrelationKey,
        message: Message,
    ) -> StoreResult<MessageGroup> {
        let mut groups = self.groups.write();
        let group = groups
            .entry(key.clone())
            .or_insert_with(|| MessageGroup::new(key.clone()));
        if let Some(capacity) = self.group_capacity
            && group.size() >= capacity
        {
            return Err(StoreError::CapacityExceeded {
                key: key.clone(),
                capacity,
            });
        }
        group.add(message);
        Ok(group.clone())
    }

    async fn remove_messages_from_group(
        &self,
        key: &CorrelationKey,
        ids: &[Uuid],
    ) -> StoreResult<MessageGroup> {
        let mut groups = self.groups.write();
        match groups.get_mut(key) {
            Some(group) => {
                group.remove(ids);
                Ok(group.clone())
            }
            None => Ok(MessageGroup::new(key.clone())),
        }
    }

    async fn remove_message_group(&self, key: &CorrelationKey) -> StoreResult<()> {
        self.groups.write().remove(key);
        Ok(())
    }

    async fn complete_group(&self, key: &CorrelationKey) -> StoreResult<()> {
        self.groups
            .write()
            .entry(key.clone())
            .or_insert_with(|| MessageGroup::new(key.clone()))
            .set_complete();
        Ok(())
    }

    async fn set_last_released_sequence_number(
        &self,
        key: &CorrelationKey,
        sequence: u64,
    ) -> StoreResult<()> {
        if let Some(group) = self.groups.write().get_mut(key) {
            group.set_last_released_sequence(sequence);
        }
        Ok(())
    }

    async fn message_groups(&self) -> StoreResult<Vec<MessageGroup>> {
        Ok(self.groups.read().values().cloned().collect())
    }

    async fn message_group_count(&self) -> StoreResult<usize> {
        Ok(self.groups.read().len())
    }

    fn register_expiry_callback(&self, callback: ExpiryCallback) {
        self.callbacks.write().push(callback);
    }

    fn expiry_callbacks(&self) -> Vec<ExpiryCallback> {
        self.callbacks.read().clone()
    }

    fn lock_registry(&self) -> &LockRegistry {
        &self.locks
    }

    fn timeout_on_idle(&self) -> bool {
        self.timeout_on_idle
    }
}

impl std::fmt::Debug for SimpleMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleMessageStore")
            .field("groups", &self.groups.read().len())
            .field("group_capacity", &self.group_capacity)
            .field("timeout_on_idle", &self.timeout_on_idle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_absent_group_is_empty() {
        let store = SimpleMessageStore::new();
        let group = store.get_message_group(&"missing".into()).await.unwrap();
        assert!(group.is_empty());
        assert_eq!(store.message_group_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_remove_and_counts() {
        let store = SimpleMessageStore::new();
        let key = CorrelationKey::from("k");
        let first = Message::new("a");
        store.add_message_to_group(&key, first.clone()).await.unwrap();
        store.add_message_to_group(&key, Message::new("b")).await.unwrap();
        store.add_message_to_group(&"other".into(), Message::new("c")).await.unwrap();

        assert_eq!(store.message_group_count().await.unwrap(), 2);
        assert_eq!(store.message_count_for_all_groups().await.unwrap(), 3);

        let group = store.remove_messages_from_group(&key, &[first.id()]).await.unwrap();
        assert_eq!(group.size(), 1);

        store.remove_message_group(&key).await.unwrap();
        assert_eq!(store.message_group_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let store = SimpleMessageStore::new().with_group_capacity(1);
        let key = CorrelationKey::from("k");
        store.add_message_to_group(&key, Message::new("a")).await.unwrap();
        let err = store
            .add_message_to_group(&key, Message::new("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 1, .. }));
    }

    #[tokio::test]
    async fn test_expiry_invokes_callbacks_and_removes() {
        let store = SimpleMessageStore::new();
        let expired = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&expired);
        store.register_expiry_callback(Arc::new(move |group: MessageGroup| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(group.key().clone());
            }
            .boxed()
        }));

        store.add_message_to_group(&"k".into(), Message::new("a")).await.unwrap();
        assert_eq!(store.expire_message_groups(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.expire_message_groups(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(*expired.lock(), vec![CorrelationKey::from("k")]);
        assert_eq!(store.message_group_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expiry_callbacks_run_after_removal_and_unlock() {
        let store = Arc::new(SimpleMessageStore::new());
        let observed = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&store);
        let seen = Arc::clone(&observed);
        store.register_expiry_callback(Arc::new(move |group: MessageGroup| {
            let (weak, seen) = (weak.clone(), Arc::clone(&seen));
            async move {
                let Some(store) = weak.upgrade() else {
                    return;
                };
                let unlocked = store.lock_registry().try_lock(group.key()).is_some();
                let remaining = store.get_message_group(group.key()).await.unwrap().size();
                *seen.lock() = Some((unlocked, remaining));
            }
            .boxed()
        }));

        store.add_message_to_group(&"k".into(), Message::new("a")).await.unwrap();
        assert_eq!(store.expire_message_groups(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(*observed.lock(), Some((true, 0)));
    }

    #[tokio::test]
    async fn test_expiry_skips_locked_groups() {
        let store = SimpleMessageStore::new();
        let key = CorrelationKey::from("busy");
        store.add_message_to_group(&key, Message::new("a")).await.unwrap();

        let lock = store.lock_registry().lock(&key).await;
        assert_eq!(store.expire_message_groups(Duration::ZERO).await.unwrap(), 0);
        drop(lock);
        assert_eq!(store.expire_message_groups(Duration::ZERO).await.unwrap(), 1);
    }
}
