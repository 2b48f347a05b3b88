use std::time::Duration;

use async_trait::async_trait;

use super::{MessageChannel, SubscribableChannel};
use crate::dispatcher::{LoadBalancingStrategy, UnicastingDispatcher};
use crate::error::MessagingResult;
use crate::foundation::Message;
use crate::handler::BoxedHandler;

/// A subscribable channel that invokes exactly one subscriber per message, on
/// the sender's task.
///
/// Subscribers are load balanced round robin with failover by default. The
/// send timeout is ignored since delivery never queues.
#[derive(Debug)]
pub struct DirectChannel {
    name: String,
    dispatcher: UnicastingDispatcher,
}

impl DirectChannel {
    /// Creates a round-robin channel with failover.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dispatcher: UnicastingDispatcher::new(),
        }
    }

    /// Replaces the load-balancing strategy.
    pub fn with_load_balancing(mut self, strategy: Option<Box<dyn LoadBalancingStrategy>>) -> Self {
        self.dispatcher = self.dispatcher.with_strategy(strategy);
        self
    }

    /// Enables or disables failover.
    pub fn with_failover(mut self, failover: bool) -> Self {
        self.dispatcher = self.dispatcher.with_failover(failover);
        self
    }
}

#[async_trait]
impl MessageChannel for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, _timeout: Option<Duration>) -> MessagingResult<bool> {
        self.dispatcher.dispatch(message).await
    }
}

impl SubscribableChannel for DirectChannel {
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
