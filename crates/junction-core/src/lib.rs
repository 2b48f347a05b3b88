//! # Junction Core
//!
//! The messaging substrate of the Junction integration framework.
//!
//! This crate provides the message model, channels, dispatchers and endpoints
//! that the aggregation and scatter-gather components in `junction-framework`
//! are built on.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Messages**: immutable envelopes with a [`Payload`] and [`MessageHeaders`]
//! - **Builder**: [`MessageBuilder`] derives new messages, never mutating old ones
//! - **Errors**: [`MessagingError`], each variant carrying its failed message
//!
//! ### Channel Layer
//!
//! - **Channels**: [`QueueChannel`], [`DirectChannel`], [`PublishSubscribeChannel`],
//!   [`FixedSubscriberChannel`], [`StreamChannel`]
//! - **Dispatchers**: [`UnicastingDispatcher`] (round robin, failover) and
//!   [`BroadcastingDispatcher`]
//!
//! ### Endpoint Layer
//!
//! - **Handlers**: the [`MessageHandler`] contract plus closure and service handlers
//! - **Consumers**: [`EventDrivenConsumer`], [`PollingConsumer`], [`StreamConsumer`]
//! - **Lifecycle**: [`Lifecycle`] start/stop for everything that owns a task
//!
//! ```text
//! ┌──────────┐     ┌─────────┐     ┌──────────┐     ┌─────────┐
//! │ Producer │────▶│ Channel │────▶│ Consumer │────▶│ Handler │
//! └──────────┘     └─────────┘     └──────────┘     └─────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use junction_core::prelude::*;
//! use std::sync::Arc;
//!
//! let channel = Arc::new(DirectChannel::new("orders"));
//! channel.subscribe(handler_fn(|message: Message| async move {
//!     tracing::info!(id = %message.id(), "order received");
//!     Ok(())
//! }));
//! channel.send(Message::new("order-1"), None).await?;
//! ```

pub mod channel;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod foundation;
pub mod handler;

// =============================================================================
// Re-exports
// =============================================================================

pub use channel::{
    ChannelRef, DirectChannel, FixedSubscriberChannel, MessageChannel, PollableChannel,
    PublishSubscribeChannel, QueueChannel, StreamChannel, StreamableChannel, SubscribableChannel,
};
pub use dispatcher::{
    BroadcastingDispatcher, DispatchOutcome, LoadBalancingStrategy, RoundRobinStrategy,
    UnicastingDispatcher,
};
pub use endpoint::{
    EventDrivenConsumer, Lifecycle, PollingConsumer, StreamConsumer, publish_error,
};
pub use error::{BoxError, MessagingError, MessagingResult};
pub use foundation::{
    AdvicePayload, ErrorPayload, Message, MessageBuilder, MessageHeaders, Payload,
    current_time_millis, names, same_channel,
};
pub use handler::{
    BoxedHandler, HandlerFn, MessageHandler, ServiceActivatingHandler, handler_fn,
    named_handler_fn, same_handler,
};

// Re-exported so downstream crates implement the async traits with the same macro.
pub use async_trait::async_trait;

/// Commonly used items.
pub mod prelude {
    pub use crate::channel::{
        ChannelRef, DirectChannel, MessageChannel, PollableChannel, PublishSubscribeChannel,
        QueueChannel, StreamChannel, StreamableChannel, SubscribableChannel,
    };
    pub use crate::endpoint::Lifecycle;
    pub use crate::error::{BoxError, MessagingError, MessagingResult};
    pub use crate::foundation::{Message, MessageBuilder, Payload};
    pub use crate::handler::{BoxedHandler, MessageHandler, handler_fn};
}
