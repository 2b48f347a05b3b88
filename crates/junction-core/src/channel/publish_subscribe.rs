use std::time::Duration;

use async_trait::async_trait;

use super::{MessageChannel, SubscribableChannel};
use crate::dispatcher::BroadcastingDispatcher;
use crate::error::MessagingResult;
use crate::foundation::Message;
use crate::handler::BoxedHandler;

/// A subscribable channel that delivers every message to every subscriber.
///
/// With [`with_apply_sequence`](Self::with_apply_sequence), subscribers see
/// copies correlated to the original message, which is how a broadcast
/// scatter phase makes its replies aggregatable.
#[derive(Default)]
pub struct PublishSubscribeChannel {
    name: String,
    dispatcher: BroadcastingDispatcher,
}

impl PublishSubscribeChannel {
    /// Creates a publish-subscribe channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dispatcher: BroadcastingDispatcher::new(),
        }
    }

    /// Stamps correlation and sequence headers on each delivered copy.
    pub fn with_apply_sequence(mut self, apply_sequence: bool) -> Self {
        self.dispatcher = self.dispatcher.with_apply_sequence(apply_sequence);
        self
    }

    /// Continues delivery when a subscriber fails.
    pub fn with_ignore_failures(mut self, ignore_failures: bool) -> Self {
        self.dispatcher = self.dispatcher.with_ignore_failures(ignore_failures);
        self
    }
}

#[async_trait]
impl MessageChannel for PublishSubscribeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, _timeout: Option<Duration>) -> MessagingResult<bool> {
        self.dispatcher.dispatch(message).await
    }
}

impl SubscribableChannel for PublishSubscribeChannel {
    fn subscribe(&self, handler: BoxedHandler) -> bool {
        self.dispatcher.add_handler(handler)
    }

    fn unsubscribe(&self, handler: &BoxedHandler) -> bool {
        self.dispatcher.remove_handler(handler)
    }

    fn subscriber_count(&self) -> usize {
        self.dispatcher.handler_count()
    }
}

impl std::fmt::Debug for PublishSubscribeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishSubscribeChannel")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
