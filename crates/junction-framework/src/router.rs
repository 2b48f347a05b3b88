//! The recipient-list router: the usual scatter half of scatter-gather.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use junction_core::{
    BoxedHandler, ChannelRef, Message, MessageBuilder, MessageHandler, MessagingError,
    MessagingResult, same_channel,
};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::roles::Scatterer;

type Selector = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A channel a router may send to, optionally guarded by a selector.
#[derive(Clone)]
pub struct Recipient {
    channel: ChannelRef,
    selector: Option<Selector>,
}

impl Recipient {
    /// A recipient that accepts every message.
    pub fn new(channel: ChannelRef) -> Self {
        Self {
            channel,
            selector: None,
        }
    }

    /// A recipient that accepts messages matching `selector`.
    pub fn with_selector(
        channel: ChannelRef,
        selector: impl Fn(&Message) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel,
            selector: Some(Arc::new(selector)),
        }
    }

    /// Returns the recipient channel.
    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    fn accepts(&self, message: &Message) -> bool {
        self.selector.as_ref().is_none_or(|select| select(message))
    }
}

impl std::fmt::Debug for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recipient")
            .field("channel", &self.channel.name())
            .field("selective", &self.selector.is_some())
            .finish()
    }
}

/// Sends each message to every recipient whose selector accepts it.
///
/// With `apply_sequence`, every copy is correlated to the inbound message
/// (correlation id = inbound id, sequence number/size over the selected
/// recipients), so an aggregator can gather the replies.
///
/// A failed send is logged and skipped with `ignore_send_failures`.
/// Otherwise it is published as an error message to the inbound message's
/// error channel, or returned to the caller when there is none.
pub struct RecipientListRouter {
    name: String,
    recipients: RwLock<Vec<Recipient>>,
    apply_sequence: bool,
    ignore_send_failures: bool,
    send_timeout: Option<Duration>,
    default_output_channel: Option<ChannelRef>,
}

impl RecipientListRouter {
    /// Creates a router without recipients.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recipients: RwLock::new(Vec::new()),
            apply_sequence: false,
            ignore_send_failures: false,
            send_timeout: None,
            default_output_channel: None,
        }
    }

    /// Adds a recipient accepting every message.
    pub fn with_recipient(self, channel: ChannelRef) -> Self {
        self.add_recipient(Recipient::new(channel));
        self
    }

    /// Adds a selective recipient.
    pub fn with_recipient_selector(
        self,
        channel: ChannelRef,
        selector: impl Fn(&Message) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.add_recipient(Recipient::with_selector(channel, selector));
        self
    }

    /// Stamps correlation and sequence headers on each copy.
    pub fn with_apply_sequence(mut self, apply_sequence: bool) -> Self {
        self.apply_sequence = apply_sequence;
        self
    }

    /// Logs and skips failed sends instead of reporting them.
    pub fn with_ignore_send_failures(mut self, ignore: bool) -> Self {
        self.ignore_send_failures = ignore;
        self
    }

    /// Sets the per-recipient send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Sets the channel used when no recipient accepts a message.
    pub fn with_default_output_channel(mut self, channel: ChannelRef) -> Self {
        self.default_output_channel = Some(channel);
        self
    }

    /// Adds a recipient at runtime.
    pub fn add_recipient(&self, recipient: Recipient) {
        self.recipients.write().push(recipient);
    }

    /// Removes every recipient sending to `channel`; returns how many were removed.
    pub fn remove_recipient(&self, channel: &ChannelRef) -> usize {
        let mut recipients = self.recipients.write();
        let before = recipients.len();
        recipients.retain(|r| !same_channel(&r.channel, channel));
        before - recipients.len()
    }

    /// Returns the current recipients.
    pub fn recipients(&self) -> Vec<Recipient> {
        self.recipients.read().clone()
    }

    async fn report_failure(&self, message: &Message, err: MessagingError) -> MessagingResult<()> {
        if self.ignore_send_failures {
            warn!(router = %self.name, error = %err, "Ignoring failed recipient send");
            return Ok(());
        }
        let Some(error_channel) = message.headers().error_channel().cloned() else {
            return Err(err);
        };
        let error_message = Message::error_for(message, err.to_string());
        if error_channel.send(error_message, self.send_timeout).await? {
            debug!(router = %self.name, channel = error_channel.name(), "Published recipient failure");
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl MessageHandler for RecipientListRouter {
    async fn handle_message(&self, message: Message) -> MessagingResult<()> {
        let selected: Vec<ChannelRef> = self
            .recipients
            .read()
            .iter()
            .filter(|r| r.accepts(&message))
            .map(|r| Arc::clone(&r.channel))
            .collect();

        if selected.is_empty() {
            let Some(default) = &self.default_output_channel else {
                return Err(MessagingError::no_destination(
                    message,
                    format!("no recipient of router '{}' accepted the message", self.name),
                ));
            };
            trace!(router = %self.name, "No recipient selected, using default output channel");
            return match default.send(message.clone(), self.send_timeout).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(MessagingError::delivery(message, "timed out sending to default output channel")),
                Err(e) => Err(e),
            };
        }

        let size = selected.len() as u64;
        for (index, channel) in selected.into_iter().enumerate() {
            let copy = if self.apply_sequence {
                MessageBuilder::from_message(&message)
                    .correlation_id(message.id().to_string())
                    .sequence(index as u64 + 1, size)
                    .build()
            } else {
                message.clone()
            };

            trace!(router = %self.name, channel = channel.name(), "Routing to recipient");
            let outcome = match channel.send(copy.clone(), self.send_timeout).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(MessagingError::delivery(
                    copy.clone(),
                    format!("timed out sending to recipient '{}'", channel.name()),
                )),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.report_failure(&copy, e).await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Scatterer for RecipientListRouter {
    fn as_handler(self: Arc<Self>) -> BoxedHandler {
        self
    }
}

impl std::fmt::Debug for RecipientListRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientListRouter")
            .field("name", &self.name)
            .field("recipients", &self.recipients.read().len())
            .field("apply_sequence", &self.apply_sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::{
        FixedSubscriberChannel, MessageChannel, PollableChannel, QueueChannel, handler_fn,
    };

    fn queue(name: &str) -> Arc<QueueChannel> {
        Arc::new(QueueChannel::new(name))
    }

    #[tokio::test]
    async fn test_apply_sequence_correlates_copies() {
        let (a, b) = (queue("a"), queue("b"));
        let router = RecipientListRouter::new("router")
            .with_recipient(a.clone())
            .with_recipient(b.clone())
            .with_apply_sequence(true);

        let request = Message::new("quote?");
        let request_id = request.id().to_string();
        router.handle_message(request).await.unwrap();

        let first = a.receive(Some(Duration::ZERO)).await.unwrap();
        let second = b.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(first.headers().get_str("correlationId"), Some(request_id.as_str()));
        assert_eq!(first.headers().sequence_number(), Some(1));
        assert_eq!(second.headers().sequence_number(), Some(2));
        assert_eq!(second.headers().sequence_size(), Some(2));
    }

    #[tokio::test]
    async fn test_selectors_filter_and_size_counts_selected() {
        let (all, big) = (queue("all"), queue("big"));
        let router = RecipientListRouter::new("router")
            .with_recipient(all.clone())
            .with_recipient_selector(big.clone(), |m| {
                m.payload().as_value().and_then(|v| v.as_i64()).is_some_and(|n| n > 100)
            })
            .with_apply_sequence(true);

        router.handle_message(Message::new(5_i64)).await.unwrap();
        assert_eq!(big.queue_size(), 0);
        let only = all.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(only.headers().sequence_size(), Some(1));
    }

    #[tokio::test]
    async fn test_no_recipient_without_default_is_an_error() {
        let router = RecipientListRouter::new("router")
            .with_recipient_selector(queue("never"), |_| false);
        let err = router.handle_message(Message::new("x")).await.unwrap_err();
        assert!(matches!(err, MessagingError::DestinationResolution { .. }));

        let fallback = queue("fallback");
        let router = router.with_default_output_channel(fallback.clone());
        router.handle_message(Message::new("x")).await.unwrap();
        assert_eq!(fallback.queue_size(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_goes_to_error_channel() {
        let broken: ChannelRef = Arc::new(FixedSubscriberChannel::new(
            "broken",
            handler_fn(|m| async move { Err(MessagingError::delivery(m, "supplier down")) }),
        ));
        let healthy = queue("healthy");
        let errors = queue("errors");
        let router = RecipientListRouter::new("router")
            .with_recipient(broken)
            .with_recipient(healthy.clone())
            .with_apply_sequence(true);

        let request = MessageBuilder::with_payload("quote?")
            .error_channel(errors.clone())
            .build();
        router.handle_message(request).await.unwrap();

        assert_eq!(healthy.queue_size(), 1);
        let error = errors.receive(Some(Duration::ZERO)).await.unwrap();
        assert!(error.is_error());
        assert_eq!(error.headers().sequence_number(), Some(1));
    }

    #[tokio::test]
    async fn test_failed_send_without_error_channel_propagates() {
        let full = Arc::new(QueueChannel::bounded("full", 1));
        full.send(Message::new("occupied"), None).await.unwrap();
        let router = RecipientListRouter::new("router")
            .with_recipient(full.clone())
            .with_send_timeout(Duration::from_millis(10));

        let err = router.handle_message(Message::new("x")).await.unwrap_err();
        assert!(matches!(err, MessagingError::Delivery { .. }));

        let router = router.with_ignore_send_failures(true);
        router.handle_message(Message::new("x")).await.unwrap();
    }

    #[test]
    fn test_remove_recipient() {
        let a: ChannelRef = queue("a");
        let router = RecipientListRouter::new("router")
            .with_recipient(a.clone())
            .with_recipient(queue("b"));
        assert_eq!(router.remove_recipient(&a), 1);
        assert_eq!(router.recipients().len(), 1);
    }
}
