//! Message handlers.
//!
//! [`MessageHandler`] is the contract every consumer of a channel implements:
//! aggregators, routers, scatter-gather and plain service handlers alike.
//!
//! # Example
//!
//! ```rust,ignore
//! use junction_core::{handler_fn, Message, MessagingResult};
//!
//! let logger = handler_fn(|message: Message| async move {
//!     tracing::info!(id = %message.id(), "received");
//!     MessagingResult::Ok(())
//! });
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::channel::ChannelRef;
use crate::error::{BoxError, MessagingError, MessagingResult};
use crate::foundation::{Message, MessageBuilder, Payload};

// ============================================================================
// MessageHandler Trait
// ============================================================================

/// A component that consumes messages.
///
/// Returning [`MessagingError::Rejected`] tells a failover-capable dispatcher
/// to offer the message to the next handler; any other error is a failure.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles a single message.
    async fn handle_message(&self, message: Message) -> MessagingResult<()>;

    /// Returns a name used in logs.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Type-erased, shareable handler.
pub type BoxedHandler = Arc<dyn MessageHandler>;

/// Returns `true` if both references point at the same handler instance.
pub fn same_handler(a: &BoxedHandler, b: &BoxedHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ============================================================================
// Closure Handlers
// ============================================================================

/// A handler backed by an async closure. Created by [`handler_fn`].
pub struct HandlerFn<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = MessagingResult<()>> + Send,
{
    async fn handle_message(&self, message: Message) -> MessagingResult<()> {
        (self.f)(message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wraps an async closure as a [`BoxedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    named_handler_fn("handler_fn", f)
}

/// Wraps an async closure as a named [`BoxedHandler`].
pub fn named_handler_fn<F, Fut>(name: impl Into<String>, f: F) -> BoxedHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    Arc::new(HandlerFn {
        name: name.into(),
        f,
    })
}

// ============================================================================
// ServiceActivatingHandler
// ============================================================================

type ServiceFn =
    dyn Fn(Message) -> BoxFuture<'static, Result<Option<Payload>, BoxError>> + Send + Sync;

/// A reply-producing handler that invokes a service function.
///
/// The reply carries the request's headers (correlation, sequence details,
/// reply and error channels), so replies can be aggregated and routed back.
/// It goes to the output channel if one is set, otherwise to the request's
/// reply channel.
pub struct ServiceActivatingHandler {
    name: String,
    service: Box<ServiceFn>,
    output_channel: RwLock<Option<ChannelRef>>,
    send_timeout: Option<Duration>,
    requires_reply: bool,
}

impl ServiceActivatingHandler {
    /// Creates a handler around an async service function.
    ///
    /// The service returns `Ok(None)` when it has nothing to reply.
    pub fn new<F, Fut>(name: impl Into<String>, service: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Payload>, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            service: Box::new(move |message| Box::pin(service(message))),
            output_channel: RwLock::new(None),
            send_timeout: None,
            requires_reply: false,
        }
    }

    /// Sets the channel replies are sent to (builder pattern).
    pub fn with_output_channel(self, channel: ChannelRef) -> Self {
        *self.output_channel.write() = Some(channel);
        self
    }

    /// Sets the send timeout for replies.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Fails when the service produces no reply.
    pub fn with_requires_reply(mut self, requires_reply: bool) -> Self {
        self.requires_reply = requires_reply;
        self
    }

    /// Replaces the output channel.
    pub fn set_output_channel(&self, channel: ChannelRef) {
        *self.output_channel.write() = Some(channel);
    }
}

#[async_trait]
impl MessageHandler for ServiceActivatingHandler {
    async fn handle_message(&self, message: Message) -> MessagingResult<()> {
        let result = match (self.service)(message.clone()).await {
            Ok(result) => result,
            Err(e) => return Err(MessagingError::handling(message, e)),
        };

        let Some(payload) = result else {
            if self.requires_reply {
                return Err(MessagingError::ReplyRequired {
                    message: Box::new(message),
                });
            }
            trace!(handler = %self.name, id = %message.id(), "Service produced no reply");
            return Ok(());
        };

        let reply = MessageBuilder::with_payload(payload)
            .copy_headers(message.headers())
            .build();
        let output = self.output_channel.read().clone();
        let destination = match output.or_else(|| reply.headers().reply_channel().cloned()) {
            Some(channel) => channel,
            None => {
                return Err(MessagingError::no_destination(
                    reply,
                    "no output channel configured and no reply channel header",
                ));
            }
        };

        debug!(
            handler = %self.name,
            request = %message.id(),
            channel = destination.name(),
            "Sending reply"
        );
        if destination.send(reply.clone(), self.send_timeout).await? {
            Ok(())
        } else {
            Err(MessagingError::delivery(
                reply,
                format!("timed out sending reply to '{}'", destination.name()),
            ))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{PollableChannel, QueueChannel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let handler = handler_fn(move |_message| {
            let c = Arc::clone(&counter_clone);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle_message(Message::new("a")).await.unwrap();
        handler.handle_message(Message::new("b")).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_service_reply_goes_to_reply_channel_with_request_headers() {
        let replies = Arc::new(QueueChannel::new("replies"));
        let handler = ServiceActivatingHandler::new("upper", |message: Message| async move {
            let text = message.payload().as_str().unwrap_or_default().to_uppercase();
            Ok(Some(Payload::from(text)))
        });

        let request = MessageBuilder::with_payload("hello")
            .correlation_id("c-7")
            .reply_channel(replies.clone())
            .build();
        handler.handle_message(request).await.unwrap();

        let reply = replies.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(reply.payload().as_str(), Some("HELLO"));
        assert_eq!(reply.headers().get_str("correlationId"), Some("c-7"));
    }

    #[tokio::test]
    async fn test_service_without_destination_fails() {
        let handler = ServiceActivatingHandler::new("echo", |message: Message| async move {
            Ok(Some(message.payload().clone()))
        });

        let err = handler.handle_message(Message::new("x")).await.unwrap_err();
        assert!(matches!(err, MessagingError::DestinationResolution { .. }));
    }

    #[tokio::test]
    async fn test_service_requires_reply() {
        let handler = ServiceActivatingHandler::new("silent", |_message: Message| async move {
            Ok(None)
        })
        .with_requires_reply(true);

        let err = handler.handle_message(Message::new("x")).await.unwrap_err();
        assert!(matches!(err, MessagingError::ReplyRequired { .. }));
    }
}
