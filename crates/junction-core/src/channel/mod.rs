//! Message channels.
//!
//! Channels decouple producers from consumers. Three consumption models exist:
//!
//! - [`PollableChannel`]: consumers pull with a bounded [`receive`](PollableChannel::receive)
//! - [`SubscribableChannel`]: handlers are pushed messages on the sender's task
//! - [`StreamableChannel`]: consumers obtain a stream of messages
//!
//! | Channel | Model |
//! |---------|-------|
//! | [`QueueChannel`] | pollable, optionally bounded |
//! | [`DirectChannel`] | subscribable, one handler per message (load balanced) |
//! | [`PublishSubscribeChannel`] | subscribable, every handler gets every message |
//! | [`FixedSubscriberChannel`] | a single handler fixed at construction |
//! | [`StreamChannel`] | streamable, broadcast-backed |

mod direct;
mod fixed;
mod publish_subscribe;
mod queue;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::MessagingResult;
use crate::foundation::Message;
use crate::handler::BoxedHandler;

pub use direct::DirectChannel;
pub use fixed::FixedSubscriberChannel;
pub use publish_subscribe::PublishSubscribeChannel;
pub use queue::QueueChannel;
pub use stream::StreamChannel;

/// A destination messages can be sent to.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Returns the channel name.
    fn name(&self) -> &str;

    /// Sends a message.
    ///
    /// `timeout` bounds how long the call may block (`None` blocks
    /// indefinitely, `Some(Duration::ZERO)` never blocks). Returns `Ok(false)`
    /// if the message could not be sent within the timeout.
    async fn send(&self, message: Message, timeout: Option<Duration>) -> MessagingResult<bool>;
}

/// Shared reference to any channel.
pub type ChannelRef = Arc<dyn MessageChannel>;

/// A channel consumers poll.
#[async_trait]
pub trait PollableChannel: MessageChannel {
    /// Receives the next message, waiting up to `timeout`.
    ///
    /// Returns `None` when the timeout elapses. A timeout is not an error.
    async fn receive(&self, timeout: Option<Duration>) -> Option<Message>;
}

/// A channel that pushes messages to subscribed handlers.
pub trait SubscribableChannel: MessageChannel {
    /// Subscribes a handler. Returns `false` if it was already subscribed.
    fn subscribe(&self, handler: BoxedHandler) -> bool;

    /// Unsubscribes a handler. Returns `false` if it was not subscribed.
    fn unsubscribe(&self, handler: &BoxedHandler) -> bool;

    /// Returns the number of subscribed handlers.
    fn subscriber_count(&self) -> usize;
}

/// A channel consumed as a stream of messages.
pub trait StreamableChannel: MessageChannel {
    /// Opens a new stream. Only messages sent after this call are observed.
    fn subscribe_stream(&self) -> BoxStream<'static, Message>;
}
