use async_trait::async_trait;
use junction_core::Message;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

use super::backend::StoreBackend;
use super::{ExpiryCallback, MessageGroupStore};
use crate::correlation::CorrelationKey;
use crate::error::{StoreError, StoreResult};
use crate::group::MessageGroup;
use crate::lock::LockRegistry;

/// Message-group store persisting each group as a JSON document.
///
/// Payloads and value headers round-trip unchanged, including nested
/// messages and error/advice bodies. Channel headers are transient and are
/// not persisted.
pub struct PersistentMessageGroupStore<B> {
    backend: B,
    callbacks: RwLock<Vec<ExpiryCallback>>,
    locks: LockRegistry,
    // serializes read-modify-write cycles against the backend
    write_lock: AsyncMutex<()>,
    timeout_on_idle: bool,
}

impl<B: StoreBackend> PersistentMessageGroupStore<B> {
    /// Creates a store over `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            callbacks: RwLock::new(Vec::new()),
            locks: LockRegistry::new(),
            write_lock: AsyncMutex::new(()),
            timeout_on_idle: false,
        }
    }

    /// Measures expiry from the last modification of a group.
    pub fn with_timeout_on_idle(mut self, timeout_on_idle: bool) -> Self {
        self.timeout_on_idle = timeout_on_idle;
        self
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn load(&self, key: &CorrelationKey) -> StoreResult<Option<MessageGroup>> {
        let Some(document) = self.backend.load(key.as_str()).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&document)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.clone(),
                source,
            })
    }

    async fn save(&self, group: &MessageGroup) -> StoreResult<()> {
        let document = serde_json::to_vec(group).map_err(|source| StoreError::Serialization {
            key: group.key().clone(),
            source,
        })?;
        self.backend.save(group.key().as_str(), document).await
    }

    async fn update<F>(&self, key: &CorrelationKey, create: bool, f: F) -> StoreResult<MessageGroup>
    where
        F: FnOnce(&mut MessageGroup) + Send,
    {
        let _write = self.write_lock.lock().await;
        let mut group = match self.load(key).await? {
            Some(group) => group,
            None if create => MessageGroup::new(key.clone()),
            None => return Ok(MessageGroup::new(key.clone())),
        };
        f(&mut group);
        self.save(&group).await?;
        Ok(group)
    }
}

#[async_trait]
impl<B: StoreBackend> MessageGroupStore for PersistentMessageGroupStore<B> {
    async fn get_message_group(&self, key: &CorrelationKey) -> StoreResult<MessageGroup> {
        Ok(self
            .load(key)
            .await?
            .unwrap_or_else(|| MessageGroup::new(key.clone())))
    }

    async fn add_message_to_group(
        &self,
        key: &CorrelationKey,
        message: Message,
    ) -> StoreResult<MessageGroup> {
        self.update(key, true, |group| group.add(message)).await
    }

    async fn remove_messages_from_group(
        &self,
        key: &CorrelationKey,
        ids: &[Uuid],
    ) -> StoreResult<MessageGroup> {
        self.update(key, false, |group| {
            group.remove(ids);
        })
        .await
    }

    async fn remove_message_group(&self, key: &CorrelationKey) -> StoreResult<()> {
        let _write = self.write_lock.lock().await;
        self.backend.delete(key.as_str()).await
    }

    async fn complete_group(&self, key: &CorrelationKey) -> StoreResult<()> {
        self.update(key, true, MessageGroup::set_complete).await?;
        Ok(())
    }

    async fn set_last_released_sequence_number(
        &self,
        key: &CorrelationKey,
        sequence: u64,
    ) -> StoreResult<()> {
        self.update(key, false, |group| group.set_last_released_sequence(sequence))
            .await?;
        Ok(())
    }

    async fn message_groups(&self) -> StoreResult<Vec<MessageGroup>> {
        let mut groups = Vec::new();
        for document in self.backend.documents().await? {
            match serde_json::from_slice::<MessageGroup>(&document) {
                Ok(group) => groups.push(group),
                Err(e) => warn!(error = %e, "Skipping unreadable group document"),
            }
        }
        Ok(groups)
    }

    async fn message_group_count(&self) -> StoreResult<usize> {
        self.backend.len().await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileBackend, InMemoryBackend};
    use junction_core::{AdvicePayload, ErrorPayload, MessageBuilder, Payload, QueueChannel};
    use std::sync::Arc;

    fn rich_messages() -> Vec<Message> {
        let inner = MessageBuilder::with_payload(serde_json::json!({"sku": "A-1", "qty": 3}))
            .header("priority", 7)
            .build();
        vec![
            MessageBuilder::with_payload(inner.clone())
                .correlation_id("order-1")
                .sequence(1, 3)
                .build(),
            MessageBuilder::with_payload(ErrorPayload::new("supplier offline", Some(inner.clone())))
                .correlation_id("order-1")
                .sequence(2, 3)
                .build(),
            MessageBuilder::with_payload(AdvicePayload::new(
                Payload::Collection(vec![Payload::from("ok"), Payload::from(12_i64)]),
                inner,
            ))
            .correlation_id("order-1")
            .sequence(3, 3)
            .build(),
        ]
    }

    #[tokio::test]
    async fn test_round_trip_preserves_nested_payloads() {
        let store = PersistentMessageGroupStore::new(InMemoryBackend::new());
        let key = CorrelationKey::from("order-1");
        let messages = rich_messages();
        for m in &messages {
            store.add_message_to_group(&key, m.clone()).await.unwrap();
        }

        let group = store.get_message_group(&key).await.unwrap();
        assert_eq!(group.messages(), messages.as_slice());
        assert_eq!(group.sequence_size(), Some(3));
    }

    #[tokio::test]
    async fn test_channel_headers_are_not_persisted() {
        let store = PersistentMessageGroupStore::new(InMemoryBackend::new());
        let key = CorrelationKey::from("k");
        let message = MessageBuilder::with_payload("x")
            .header("region", "eu")
            .reply_channel(Arc::new(QueueChannel::new("replies")))
            .build();
        store.add_message_to_group(&key, message).await.unwrap();

        let stored = store.get_message_group(&key).await.unwrap();
        let headers = stored.messages()[0].headers();
        assert!(headers.reply_channel().is_none());
        assert_eq!(headers.get_str("region"), Some("eu"));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = CorrelationKey::from("order-1");
        let messages = rich_messages();
        {
            let store = PersistentMessageGroupStore::new(FileBackend::open(dir.path()).await.unwrap());
            for m in &messages {
                store.add_message_to_group(&key, m.clone()).await.unwrap();
            }
            store.complete_group(&key).await.unwrap();
        }

        let reopened = PersistentMessageGroupStore::new(FileBackend::open(dir.path()).await.unwrap());
        let group = reopened.get_message_group(&key).await.unwrap();
        assert!(group.is_complete());
        assert_eq!(group.messages(), messages.as_slice());
        assert_eq!(reopened.message_group_count().await.unwrap(), 1);

        reopened.remove_message_group(&key).await.unwrap();
        assert_eq!(reopened.message_group_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_handles_long_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistentMessageGroupStore::new(FileBackend::open(dir.path()).await.unwrap());
        let key = CorrelationKey::from(format!("tenant-{}", "x".repeat(250)));

        store.add_message_to_group(&key, Message::new("a")).await.unwrap();
        store.add_message_to_group(&key, Message::new("b")).await.unwrap();

        let groups = store.message_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key(), &key);
        assert_eq!(groups[0].size(), 2);

        assert_eq!(store.expire_message_groups(std::time::Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.message_group_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_a_serialization_error() {
        let backend = InMemoryBackend::new();
        backend.save("bad", b"not json".to_vec()).await.unwrap();
        let store = PersistentMessageGroupStore::new(backend);

        let err = store.get_message_group(&"bad".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
