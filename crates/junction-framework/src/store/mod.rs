//! Message-group stores.
//!
//! A [`MessageGroupStore`] owns the correlation state of one or more
//! aggregators. Besides CRUD on groups it provides:
//!
//! - a [`LockRegistry`] whose per-key lock every group mutation runs under
//! - expiry: [`expire_message_groups`](MessageGroupStore::expire_message_groups)
//!   removes stale groups, then hands them to the registered [`ExpiryCallback`]s
//!
//! | Store | Backing |
//! |-------|---------|
//! | [`SimpleMessageStore`] | in-memory map |
//! | [`PersistentMessageGroupStore`] | JSON documents in a [`StoreBackend`] |
//!
//! Expiry only try-locks: a group whose lock is held (for example while it
//! is being completed) is skipped by that sweep. Callbacks run after the
//! group is removed and its lock released, so they may feed messages for
//! the same key back into the store.

mod backend;
mod persistent;
mod simple;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use junction_core::{Message, current_time_millis};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::correlation::CorrelationKey;
use crate::error::StoreResult;
use crate::group::MessageGroup;
use crate::lock::LockRegistry;

pub use backend::{FileBackend, InMemoryBackend, StoreBackend};
pub use persistent::PersistentMessageGroupStore;
pub use simple::SimpleMessageStore;

/// Invoked with each expired group once it has been removed and unlocked.
pub type ExpiryCallback = Arc<dyn Fn(MessageGroup) -> BoxFuture<'static, ()> + Send + Sync>;

/// Storage for message groups.
#[async_trait]
pub trait MessageGroupStore: Send + Sync {
    /// Returns the group for `key`, or an empty group if none exists.
    async fn get_message_group(&self, key: &CorrelationKey) -> StoreResult<MessageGroup>;

    /// Appends `message` to the group for `key`, creating it if needed.
    async fn add_message_to_group(
        &self,
        key: &CorrelationKey,
        message: Message,
    ) -> StoreResult<MessageGroup>;

    /// Removes the messages with the given ids from a group.
    async fn remove_messages_from_group(
        &self,
        key: &CorrelationKey,
        ids: &[Uuid],
    ) -> StoreResult<MessageGroup>;

    /// Removes the group for `key`.
    async fn remove_message_group(&self, key: &CorrelationKey) -> StoreResult<()>;

    /// Marks the group for `key` complete.
    async fn complete_group(&self, key: &CorrelationKey) -> StoreResult<()>;

    /// Records the highest released sequence number of a group.
    async fn set_last_released_sequence_number(
        &self,
        key: &CorrelationKey,
        sequence: u64,
    ) -> StoreResult<()>;

    /// Returns a snapshot of all groups.
    async fn message_groups(&self) -> StoreResult<Vec<MessageGroup>>;

    /// Returns the number of groups.
    async fn message_group_count(&self) -> StoreResult<usize> {
        Ok(self.message_groups().await?.len())
    }

    /// Returns the number of messages across all groups.
    async fn message_count_for_all_groups(&self) -> StoreResult<usize> {
        Ok(self
            .message_groups()
            .await?
            .iter()
            .map(MessageGroup::size)
            .sum())
    }

    /// Registers a callback invoked for every expired group.
    fn register_expiry_callback(&self, callback: ExpiryCallback);

    /// Returns the registered expiry callbacks.
    fn expiry_callbacks(&self) -> Vec<ExpiryCallback>;

    /// Returns the per-key lock registry.
    fn lock_registry(&self) -> &LockRegistry;

    /// Measures group age from the last modification instead of creation.
    fn timeout_on_idle(&self) -> bool {
        false
    }

    /// Expires every group older than `timeout` whose lock is free.
    ///
    /// Each expired group is removed under its lock, then handed to the
    /// expiry callbacks. Returns the number of groups expired.
    async fn expire_message_groups(&self, timeout: Duration) -> StoreResult<usize> {
        let threshold = current_time_millis().saturating_sub(timeout.as_millis() as u64);
        let is_stale = |group: &MessageGroup| {
            let stamp = if self.timeout_on_idle() {
                group.last_modified()
            } else {
                group.created_at()
            };
            stamp <= threshold
        };

        let mut expired = 0;
        for candidate in self.message_groups().await? {
            if !is_stale(&candidate) {
                continue;
            }
            let key = candidate.key().clone();
            let Some(lock) = self.lock_registry().try_lock(&key) else {
                trace!(%key, "Group is locked, skipping expiry");
                continue;
            };

            // the group may have changed between the snapshot and the lock
            let group = self.get_message_group(&key).await?;
            if (group.is_empty() && !group.is_complete()) || !is_stale(&group) {
                continue;
            }
            self.remove_message_group(&key).await?;
            drop(lock);

            expired += 1;
            debug!(%key, size = group.size(), "Expired message group");
            for callback in self.expiry_callbacks() {
                callback(group.clone()).await;
            }
        }
        Ok(expired)
    }
}

/// Shared store handle.
pub type SharedStore = Arc<dyn MessageGroupStore>;
