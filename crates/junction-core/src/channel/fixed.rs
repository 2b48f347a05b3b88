use std::time::Duration;

use async_trait::async_trait;

use super::{MessageChannel, SubscribableChannel};
use crate::error::MessagingResult;
use crate::foundation::Message;
use crate::handler::{BoxedHandler, same_handler};

/// A channel bound to a single handler at construction.
///
/// Sending invokes the handler directly. Subscription changes are refused,
/// which makes this channel suitable as an internal reply sink.
pub struct FixedSubscriberChannel {
    name: String,
    handler: BoxedHandler,
}

impl FixedSubscriberChannel {
    /// Binds a channel to `handler`.
    pub fn new(name: impl Into<String>, handler: BoxedHandler) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl MessageChannel for FixedSubscriberChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, _timeout: Option<Duration>) -> MessagingResult<bool> {
        self.handler.handle_message(message).await?;
        Ok(true)
    }
}

impl SubscribableChannel for FixedSubscriberChannel {
    fn subscribe(&self, handler: BoxedHandler) -> bool {
        same_handler(&self.handler, &handler)
    }

    fn unsubscribe(&self, _handler: &BoxedHandler) -> bool {
        false
    }

    fn subscriber_count(&self) -> usize {
        1
    }
}

impl std::fmt::Debug for FixedSubscriberChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSubscriberChannel")
            .field("name", &self.name)
            .field("handler", &self.handler.name())
            .finish()
    }
}
