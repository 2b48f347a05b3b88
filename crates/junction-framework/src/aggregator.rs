//! The correlating aggregator.
//!
//! [`AggregatingMessageHandler`] groups messages by correlation key in a
//! [`MessageGroupStore`] and, once its [`ReleaseStrategy`] says a group is
//! complete, emits one combined message produced by its
//! [`MessageGroupProcessor`].
//!
//! # Message flow
//!
//! ```text
//! message ─▶ correlation key ─▶ lock(key) ─▶ add to group ─▶ release? ─┬─ no ─▶ (wait)
//!                                                                      └─ yes ─▶ process
//!                                                      unlock ◀─ remove/complete group ◀─┘
//!                                                        │
//!                                                        └─▶ output channel | reply channel
//! ```
//!
//! # Incomplete groups
//!
//! Groups that never complete are handled by expiry: either a
//! [`MessageGroupStoreReaper`](crate::MessageGroupStoreReaper) sweeping the
//! store, a per-group `group_timeout`, or an explicit
//! [`force_complete`](AggregatingMessageHandler::force_complete). Expired
//! groups are released as a partial result when `send_partial_result_on_expiry`
//! is set; otherwise their messages go to the discard channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let aggregator = AggregatingMessageHandler::builder()
//!     .with_store(store)
//!     .with_release_strategy(MessageCountReleaseStrategy::new(3))
//!     .with_output_channel(results)
//!     .build();
//! inbound.subscribe(aggregator.clone());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use junction_core::{
    BoxError, BoxedHandler, ChannelRef, Message, MessageHandler, MessagingError, MessagingResult,
    publish_error,
};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, debug, span, trace, warn};

use crate::correlation::{CorrelationKey, CorrelationStrategy, HeaderAttributeCorrelationStrategy};
use crate::group::MessageGroup;
use crate::processor::{DefaultAggregatingProcessor, MessageGroupProcessor};
use crate::release::{ReleaseStrategy, SequenceSizeReleaseStrategy};
use crate::roles::Gatherer;
use crate::store::{MessageGroupStore, SharedStore, SimpleMessageStore};

/// Cause attached to messages whose correlation key cannot be determined.
pub const NULL_CORRELATION: &str =
    "null correlation not allowed, maybe the correlation strategy is failing?";

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`AggregatingMessageHandler`].
pub struct AggregatorBuilder {
    name: String,
    store: Option<SharedStore>,
    correlation: Arc<dyn CorrelationStrategy>,
    release: Arc<dyn ReleaseStrategy>,
    processor: Arc<dyn MessageGroupProcessor>,
    output_channel: Option<ChannelRef>,
    discard_channel: Option<ChannelRef>,
    send_timeout: Option<Duration>,
    expire_groups_upon_completion: bool,
    send_partial_result_on_expiry: bool,
    group_timeout: Option<Duration>,
    expire_groups_upon_timeout: bool,
}

impl Default for AggregatorBuilder {
    fn default() -> Self {
        Self {
            name: "aggregator".to_string(),
            store: None,
            correlation: Arc::new(HeaderAttributeCorrelationStrategy::default()),
            release: Arc::new(SequenceSizeReleaseStrategy),
            processor: Arc::new(DefaultAggregatingProcessor),
            output_channel: None,
            discard_channel: None,
            send_timeout: None,
            expire_groups_upon_completion: false,
            send_partial_result_on_expiry: false,
            group_timeout: None,
            expire_groups_upon_timeout: true,
        }
    }
}

impl AggregatorBuilder {
    /// Sets the name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the group store; defaults to a fresh [`SimpleMessageStore`].
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the correlation strategy.
    pub fn with_correlation_strategy(mut self, strategy: impl CorrelationStrategy + 'static) -> Self {
        self.correlation = Arc::new(strategy);
        self
    }

    /// Sets the release strategy.
    pub fn with_release_strategy(mut self, strategy: impl ReleaseStrategy + 'static) -> Self {
        self.release = Arc::new(strategy);
        self
    }

    /// Sets the group processor.
    pub fn with_processor(mut self, processor: impl MessageGroupProcessor + 'static) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    /// Sets the channel results are sent to.
    pub fn with_output_channel(mut self, channel: ChannelRef) -> Self {
        self.output_channel = Some(channel);
        self
    }

    /// Sets the channel discarded messages are sent to.
    pub fn with_discard_channel(mut self, channel: ChannelRef) -> Self {
        self.discard_channel = Some(channel);
        self
    }

    /// Sets the timeout for sending results.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Removes released groups instead of keeping them to detect late arrivals.
    pub fn with_expire_groups_upon_completion(mut self, expire: bool) -> Self {
        self.expire_groups_upon_completion = expire;
        self
    }

    /// Releases expired groups as partial results instead of discarding them.
    pub fn with_send_partial_result_on_expiry(mut self, send: bool) -> Self {
        self.send_partial_result_on_expiry = send;
        self
    }

    /// Force-completes a group after this much inactivity.
    pub fn with_group_timeout(mut self, timeout: Duration) -> Self {
        self.group_timeout = Some(timeout);
        self
    }

    /// Removes timed-out groups (default) instead of marking them complete.
    pub fn with_expire_groups_upon_timeout(mut self, expire: bool) -> Self {
        self.expire_groups_upon_timeout = expire;
        self
    }

    /// Builds the handler and registers its expiry callback with the store.
    pub fn build(self) -> Arc<AggregatingMessageHandler> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(SimpleMessageStore::new()));

        let handler = Arc::new_cyclic(|this| AggregatingMessageHandler {
            name: self.name,
            store,
            correlation: self.correlation,
            release: self.release,
            processor: self.processor,
            output_channel: RwLock::new(self.output_channel),
            discard_channel: self.discard_channel,
            send_timeout: self.send_timeout,
            expire_groups_upon_completion: self.expire_groups_upon_completion,
            send_partial_result_on_expiry: self.send_partial_result_on_expiry,
            group_timeout: self.group_timeout,
            expire_groups_upon_timeout: self.expire_groups_upon_timeout,
            timers: Mutex::new(HashMap::new()),
            this: this.clone(),
        });

        let weak = Arc::downgrade(&handler);
        handler.store.register_expiry_callback(Arc::new(move |group: MessageGroup| {
            let weak = weak.clone();
            async move {
                if let Some(handler) = weak.upgrade() {
                    handler.on_store_expiry(group).await;
                }
            }
            .boxed()
        }));
        handler
    }
}

// ============================================================================
// AggregatingMessageHandler
// ============================================================================

/// What an expired group emits once its lock is released.
enum ExpiryOutcome {
    Release(Message),
    Discard(Vec<Message>),
}

/// A pending group timeout and the group state it was scheduled for.
struct ScheduledTimeout {
    stamp: (u64, usize),
    task: JoinHandle<()>,
}

/// Correlates messages into groups and releases each complete group as one message.
pub struct AggregatingMessageHandler {
    name: String,
    store: SharedStore,
    correlation: Arc<dyn CorrelationStrategy>,
    release: Arc<dyn ReleaseStrategy>,
    processor: Arc<dyn MessageGroupProcessor>,
    output_channel: RwLock<Option<ChannelRef>>,
    discard_channel: Option<ChannelRef>,
    send_timeout: Option<Duration>,
    expire_groups_upon_completion: bool,
    send_partial_result_on_expiry: bool,
    group_timeout: Option<Duration>,
    expire_groups_upon_timeout: bool,
    timers: Mutex<HashMap<CorrelationKey, ScheduledTimeout>>,
    this: Weak<Self>,
}

fn group_stamp(group: &MessageGroup) -> (u64, usize) {
    (group.last_modified(), group.size())
}

impl AggregatingMessageHandler {
    /// Starts a builder with default strategies.
    pub fn builder() -> AggregatorBuilder {
        AggregatorBuilder::default()
    }

    /// Returns the group store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Returns the number of scheduled group timeouts.
    pub fn scheduled_timeouts(&self) -> usize {
        self.timers.lock().len()
    }

    /// Releases or discards the group for `key` now, regardless of its
    /// release strategy.
    ///
    /// Does nothing if the group is empty.
    pub async fn force_complete(&self, key: &CorrelationKey) -> MessagingResult<()> {
        let lock = self.store.lock_registry().lock(key).await;
        self.cancel_timeout(key);
        let group = self
            .store
            .get_message_group(key)
            .await
            .map_err(|e| MessagingError::handling(Message::new(key.to_string()), e))?;
        let outcome = self.force_complete_locked(&group).await?;
        drop(lock);

        match (outcome, group.one()) {
            (Some(outcome), Some(first)) => self.emit_expired(outcome, first).await,
            _ => Ok(()),
        }
    }

    /// Completes an expired or timed-out group while its lock is held.
    ///
    /// Nothing is sent here; the caller emits the outcome after unlocking.
    async fn force_complete_locked(
        &self,
        group: &MessageGroup,
    ) -> MessagingResult<Option<ExpiryOutcome>> {
        let Some(first) = group.one().cloned() else {
            return Ok(None);
        };
        let key = group.key();

        let result = match self.release_expired(group).await {
            Ok(result) => result,
            Err(e) => {
                self.remove_group(key, &first).await?;
                return Err(MessagingError::handling(first, e));
            }
        };

        if self.expire_groups_upon_timeout {
            self.remove_group(key, &first).await?;
        } else {
            self.retain_completed(group, &first).await?;
        }
        Ok(result)
    }

    /// Produces the partial result of an expired group, or the messages to discard.
    async fn release_expired(&self, group: &MessageGroup) -> Result<Option<ExpiryOutcome>, BoxError> {
        if group.is_empty() {
            return Ok(None);
        }
        if self.send_partial_result_on_expiry {
            debug!(handler = %self.name, key = %group.key(), size = group.size(), "Releasing partial group");
            let result = self.processor.process_group(group).await?;
            return Ok(Some(ExpiryOutcome::Release(result)));
        }
        Ok(Some(ExpiryOutcome::Discard(group.messages().to_vec())))
    }

    /// Sends an expiry outcome; must not be called with the group lock held.
    async fn emit_expired(&self, outcome: ExpiryOutcome, first: &Message) -> MessagingResult<()> {
        match outcome {
            ExpiryOutcome::Release(result) => self.send_output(result, first).await,
            ExpiryOutcome::Discard(messages) => {
                for message in messages {
                    self.discard(message).await;
                }
                Ok(())
            }
        }
    }

    /// Invoked by the store for each group it has expired and unlocked.
    async fn on_store_expiry(&self, group: MessageGroup) {
        self.cancel_timeout(group.key());
        let Some(first) = group.one().cloned() else {
            return;
        };
        let sent = match self.release_expired(&group).await {
            Ok(Some(outcome)) => self.emit_expired(outcome, &first).await,
            Ok(None) => Ok(()),
            Err(e) => Err(MessagingError::handling(first, e)),
        };
        if let Err(e) = sent {
            publish_error(&self.name, e).await;
        }
    }

    async fn on_group_timeout(&self, key: CorrelationKey, stamp: (u64, usize)) {
        let lock = self.store.lock_registry().lock(&key).await;
        let group = match self.store.get_message_group(&key).await {
            Ok(group) => group,
            Err(e) => {
                warn!(handler = %self.name, %key, error = %e, "Failed to load timed-out group");
                return;
            }
        };
        if group.is_complete() || group.is_empty() || group_stamp(&group) != stamp {
            trace!(handler = %self.name, %key, "Group changed since timeout was scheduled");
            return;
        }
        self.timers.lock().remove(&key);

        debug!(handler = %self.name, %key, size = group.size(), "Group timed out");
        let outcome = self.force_complete_locked(&group).await;
        drop(lock);

        let sent = match (outcome, group.one()) {
            (Ok(Some(outcome)), Some(first)) => self.emit_expired(outcome, first).await,
            (Ok(_), _) => Ok(()),
            (Err(e), _) => Err(e),
        };
        if let Err(e) = sent {
            publish_error(&self.name, e).await;
        }
    }

    fn schedule_timeout(&self, group: &MessageGroup) {
        let Some(timeout) = self.group_timeout else {
            return;
        };
        let key = group.key().clone();
        let stamp = group_stamp(group);
        let this = self.this.clone();
        let timer_key = key.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(handler) = this.upgrade() {
                handler.on_group_timeout(timer_key, stamp).await;
            }
        });

        if let Some(previous) = self.timers.lock().insert(key, ScheduledTimeout { stamp, task }) {
            previous.task.abort();
        }
    }

    fn cancel_timeout(&self, key: &CorrelationKey) {
        if let Some(scheduled) = self.timers.lock().remove(key) {
            trace!(handler = %self.name, %key, stamp = ?scheduled.stamp, "Cancelled group timeout");
            scheduled.task.abort();
        }
    }

    /// Processes a released group and updates the store; runs under the group lock.
    async fn complete_group(&self, group: &MessageGroup, trigger: &Message) -> MessagingResult<Message> {
        let result = match self.processor.process_group(group).await {
            Ok(result) => result,
            Err(e) => {
                warn!(handler = %self.name, key = %group.key(), error = %e, "Group processing failed, evicting group");
                self.remove_group(group.key(), trigger).await?;
                return Err(MessagingError::handling(trigger.clone(), e));
            }
        };

        if self.expire_groups_upon_completion {
            self.remove_group(group.key(), trigger).await?;
        } else {
            self.retain_completed(group, trigger).await?;
        }
        debug!(handler = %self.name, key = %group.key(), size = group.size(), "Released group");
        Ok(result)
    }

    /// Empties a released group and marks it complete so late arrivals are discarded.
    async fn retain_completed(&self, group: &MessageGroup, trigger: &Message) -> MessagingResult<()> {
        let key = group.key();
        let ids: Vec<_> = group.messages().iter().map(Message::id).collect();
        let last_sequence = group
            .messages()
            .iter()
            .filter_map(|m| m.headers().sequence_number())
            .max()
            .unwrap_or_default();

        let store_op = async {
            self.store.remove_messages_from_group(key, &ids).await?;
            self.store.complete_group(key).await?;
            self.store.set_last_released_sequence_number(key, last_sequence).await
        };
        store_op.await.map_err(|e| e.into_messaging(trigger.clone()))
    }

    async fn remove_group(&self, key: &CorrelationKey, trigger: &Message) -> MessagingResult<()> {
        self.store
            .remove_message_group(key)
            .await
            .map_err(|e| e.into_messaging(trigger.clone()))
    }

    async fn discard(&self, message: Message) {
        match &self.discard_channel {
            Some(channel) => match channel.send(message.clone(), self.send_timeout).await {
                Ok(true) => trace!(handler = %self.name, id = %message.id(), "Discarded message"),
                Ok(false) => warn!(handler = %self.name, id = %message.id(), "Discard channel refused message"),
                Err(e) => warn!(handler = %self.name, error = %e, "Failed to send to discard channel"),
            },
            None => debug!(handler = %self.name, id = %message.id(), "Dropping discarded message"),
        }
    }

    /// Sends a result to the output channel, else to the reply channel of the
    /// result or of the message that triggered it.
    async fn send_output(&self, result: Message, trigger: &Message) -> MessagingResult<()> {
        let output = self.output_channel.read().clone();
        let destination = output
            .or_else(|| result.headers().reply_channel().cloned())
            .or_else(|| trigger.headers().reply_channel().cloned());
        let Some(channel) = destination else {
            return Err(MessagingError::no_destination(
                result,
                "no output channel configured and no reply channel header",
            ));
        };

        trace!(handler = %self.name, channel = channel.name(), id = %result.id(), "Sending aggregate");
        if channel.send(result.clone(), self.send_timeout).await? {
            Ok(())
        } else {
            Err(MessagingError::delivery(
                result,
                format!("timed out sending aggregate to '{}'", channel.name()),
            ))
        }
    }
}

#[async_trait]
impl MessageHandler for AggregatingMessageHandler {
    async fn handle_message(&self, message: Message) -> MessagingResult<()> {
        let Some(key) = self.correlation.correlation_key(&message) else {
            return Err(MessagingError::handling(
                message,
                MessagingError::illegal_state(NULL_CORRELATION),
            ));
        };

        let span = span!(Level::DEBUG, "aggregate", handler = %self.name, %key);
        self.aggregate(key, message).instrument(span).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl AggregatingMessageHandler {
    async fn aggregate(&self, key: CorrelationKey, message: Message) -> MessagingResult<()> {
        let lock = self.store.lock_registry().lock(&key).await;
        let group = self
            .store
            .get_message_group(&key)
            .await
            .map_err(|e| e.into_messaging(message.clone()))?;

        let duplicate = message
            .headers()
            .sequence_number()
            .is_some_and(|n| group.contains_sequence(n));
        if group.is_complete() || duplicate {
            drop(lock);
            debug!(id = %message.id(), complete = group.is_complete(), "Discarding late or duplicate message");
            self.discard(message).await;
            return Ok(());
        }

        self.cancel_timeout(&key);
        let group = self
            .store
            .add_message_to_group(&key, message.clone())
            .await
            .map_err(|e| e.into_messaging(message.clone()))?;
        trace!(size = group.size(), "Added message to group");

        let result = if self.release.can_release(&group) {
            Some(self.complete_group(&group, &message).await?)
        } else {
            self.schedule_timeout(&group);
            None
        };
        drop(lock);

        match result {
            Some(result) => self.send_output(result, &message).await,
            None => Ok(()),
        }
    }
}

impl Gatherer for AggregatingMessageHandler {
    fn output_channel(&self) -> Option<ChannelRef> {
        self.output_channel.read().clone()
    }

    fn set_output_channel(&self, channel: ChannelRef) {
        *self.output_channel.write() = Some(channel);
    }

    fn as_handler(self: Arc<Self>) -> BoxedHandler {
        self
    }
}

impl Drop for AggregatingMessageHandler {
    fn drop(&mut self) {
        for (_, scheduled) in self.timers.get_mut().drain() {
            scheduled.task.abort();
        }
    }
}

impl std::fmt::Debug for AggregatingMessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatingMessageHandler")
            .field("name", &self.name)
            .field("expire_groups_upon_completion", &self.expire_groups_upon_completion)
            .field("send_partial_result_on_expiry", &self.send_partial_result_on_expiry)
            .field("group_timeout", &self.group_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FnGroupProcessor;
    use crate::release::MessageCountReleaseStrategy;
    use junction_core::{
        DirectChannel, MessageBuilder, Payload, PollableChannel, QueueChannel, SubscribableChannel,
        handler_fn,
    };
    use std::error::Error as _;

    fn part(key: &str, n: u64, size: u64) -> Message {
        MessageBuilder::with_payload(format!("{key}-{n}"))
            .correlation_id(key)
            .sequence(n, size)
            .build()
    }

    fn aggregator(output: &Arc<QueueChannel>) -> AggregatorBuilder {
        AggregatingMessageHandler::builder().with_output_channel(output.clone())
    }

    #[tokio::test]
    async fn test_two_parts_release_exactly_one_output() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output)
            .with_expire_groups_upon_completion(true)
            .build();

        handler.handle_message(part("k", 1, 2)).await.unwrap();
        assert_eq!(output.queue_size(), 0);
        handler.handle_message(part("k", 2, 2)).await.unwrap();

        let result = output.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(
            result.payload(),
            &Payload::Collection(vec![Payload::from("k-1"), Payload::from("k-2")])
        );
        assert_eq!(output.queue_size(), 0);
        assert_eq!(handler.store().message_group_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_null_correlation_fails_without_creating_group() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output).build();

        let err = handler.handle_message(Message::new("orphan")).await.unwrap_err();
        assert!(matches!(err, MessagingError::Handling { .. }));
        assert!(err.source().unwrap().to_string().contains("null correlation"));
        assert_eq!(handler.store().message_group_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_processor_failure_evicts_group() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output)
            .with_processor(FnGroupProcessor::new(|_| Err("processor exploded".into())))
            .build();

        handler.handle_message(part("k", 1, 2)).await.unwrap();
        let trigger = part("k", 2, 2);
        let trigger_id = trigger.id();
        let err = handler.handle_message(trigger).await.unwrap_err();

        assert_eq!(err.failed_message().map(Message::id), Some(trigger_id));
        assert!(err.to_string().contains("processor exploded"));
        let group = handler.store().get_message_group(&"k".into()).await.unwrap();
        assert_eq!(group.size(), 0);
    }

    #[tokio::test]
    async fn test_late_arrivals_are_discarded_after_release() {
        let output = Arc::new(QueueChannel::new("out"));
        let discards = Arc::new(QueueChannel::new("discards"));
        let handler = aggregator(&output)
            .with_discard_channel(discards.clone())
            .build();

        handler.handle_message(part("k", 1, 2)).await.unwrap();
        handler.handle_message(part("k", 2, 2)).await.unwrap();
        handler.handle_message(part("k", 3, 2)).await.unwrap();

        assert_eq!(output.queue_size(), 1);
        let late = discards.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(late.payload().as_str(), Some("k-3"));

        let group = handler.store().get_message_group(&"k".into()).await.unwrap();
        assert!(group.is_complete());
        assert!(group.is_empty());
        assert_eq!(group.last_released_sequence(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_numbers_are_discarded() {
        let output = Arc::new(QueueChannel::new("out"));
        let discards = Arc::new(QueueChannel::new("discards"));
        let handler = aggregator(&output)
            .with_discard_channel(discards.clone())
            .build();

        handler.handle_message(part("k", 1, 3)).await.unwrap();
        handler.handle_message(part("k", 1, 3)).await.unwrap();

        assert_eq!(discards.queue_size(), 1);
        let group = handler.store().get_message_group(&"k".into()).await.unwrap();
        assert_eq!(group.size(), 1);
    }

    #[tokio::test]
    async fn test_reply_channel_used_without_output_channel() {
        let replies = Arc::new(QueueChannel::new("replies"));
        let handler = AggregatingMessageHandler::builder()
            .with_release_strategy(MessageCountReleaseStrategy::new(1))
            .build();

        let message = MessageBuilder::with_payload("solo")
            .correlation_id("k")
            .reply_channel(replies.clone())
            .build();
        handler.handle_message(message).await.unwrap();
        assert_eq!(replies.queue_size(), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_is_an_error() {
        let handler = AggregatingMessageHandler::builder()
            .with_release_strategy(MessageCountReleaseStrategy::new(1))
            .build();
        let err = handler
            .handle_message(MessageBuilder::with_payload("x").correlation_id("k").build())
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::DestinationResolution { .. }));
    }

    #[tokio::test]
    async fn test_store_expiry_sends_partial_result() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output)
            .with_send_partial_result_on_expiry(true)
            .build();

        handler.handle_message(part("k", 1, 3)).await.unwrap();
        handler.handle_message(part("k", 2, 3)).await.unwrap();
        let expired = handler
            .store()
            .expire_message_groups(Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(expired, 1);
        let partial = output.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(partial.payload().as_collection().map(<[Payload]>::len), Some(2));
    }

    #[tokio::test]
    async fn test_store_expiry_discards_without_partial_result() {
        let output = Arc::new(QueueChannel::new("out"));
        let discards = Arc::new(QueueChannel::new("discards"));
        let handler = aggregator(&output)
            .with_discard_channel(discards.clone())
            .build();

        handler.handle_message(part("k", 1, 3)).await.unwrap();
        handler.store().expire_message_groups(Duration::ZERO).await.unwrap();

        assert_eq!(output.queue_size(), 0);
        assert_eq!(discards.queue_size(), 1);
    }

    #[tokio::test]
    async fn test_discards_may_reenter_the_same_key() {
        let output = Arc::new(QueueChannel::new("out"));
        let discards = Arc::new(DirectChannel::new("discards"));
        let handler = aggregator(&output)
            .with_discard_channel(discards.clone())
            .build();

        // every discarded part is handed straight back to the aggregator
        let target = Arc::downgrade(&handler);
        discards.subscribe(handler_fn(move |message: Message| {
            let target = target.clone();
            async move {
                match target.upgrade() {
                    Some(handler) => handler.handle_message(message).await,
                    None => Ok(()),
                }
            }
        }));

        let key = CorrelationKey::from("k");
        handler.handle_message(part("k", 1, 3)).await.unwrap();
        let expired = tokio::time::timeout(
            Duration::from_secs(2),
            handler.store().expire_message_groups(Duration::ZERO),
        )
        .await
        .expect("expiry blocked on the group lock")
        .unwrap();
        assert_eq!(expired, 1);
        assert_eq!(handler.store().get_message_group(&key).await.unwrap().size(), 1);

        tokio::time::timeout(Duration::from_secs(2), handler.force_complete(&key))
            .await
            .expect("force_complete blocked on the group lock")
            .unwrap();
        assert_eq!(handler.store().get_message_group(&key).await.unwrap().size(), 1);
        assert!(!handler.store().lock_registry().is_locked(&key));
        assert_eq!(output.queue_size(), 0);
    }

    #[tokio::test]
    async fn test_force_complete() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output)
            .with_send_partial_result_on_expiry(true)
            .build();

        handler.handle_message(part("k", 1, 3)).await.unwrap();
        handler.force_complete(&"k".into()).await.unwrap();
        handler.force_complete(&"missing".into()).await.unwrap();

        assert_eq!(output.queue_size(), 1);
        assert_eq!(handler.store().message_group_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_timeout_releases_partial_group() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output)
            .with_send_partial_result_on_expiry(true)
            .with_group_timeout(Duration::from_secs(5))
            .build();

        handler.handle_message(part("k", 1, 3)).await.unwrap();
        assert_eq!(handler.scheduled_timeouts(), 1);

        let partial = output.receive(Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(partial.payload().as_collection().map(<[Payload]>::len), Some(1));
        assert_eq!(handler.scheduled_timeouts(), 0);
        assert_eq!(handler.store().message_group_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_timeout_is_rescheduled_by_new_messages() {
        let output = Arc::new(QueueChannel::new("out"));
        let handler = aggregator(&output)
            .with_send_partial_result_on_expiry(true)
            .with_group_timeout(Duration::from_secs(5))
            .build();

        handler.handle_message(part("k", 1, 2)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handler.handle_message(part("k", 2, 2)).await.unwrap();

        // completed normally; the cancelled timer must not produce a second result
        assert_eq!(handler.scheduled_timeouts(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(output.queue_size(), 1);
    }
}
