//! Scatter-gather: one request out to many recipients, one combined reply back.
//!
//! [`ScatterGatherHandler`] composes a scatter side (a [`Scatterer`] such as
//! [`RecipientListRouter`](crate::RecipientListRouter), or a plain channel
//! that fans out by itself) with a [`Gatherer`] such as
//! [`AggregatingMessageHandler`](crate::AggregatingMessageHandler).
//!
//! # Request flow
//!
//! ```text
//!                 ┌──────────────────── scatter message ───────────────────┐
//! request ─▶ [scatter-gather] ─▶ scatter channel ─▶ recipients ─▶ gather channel ─▶ gatherer
//!     ▲                                                                     │
//!     └──── receive(gather_timeout) ◀── gatherResultChannel ◀── forwarder ◀─┘
//! ```
//!
//! Each request gets its own result queue, referenced from the scatter
//! message by the [`GATHER_RESULT_CHANNEL`] header. The gatherer's output is
//! a forwarder that sends each result to the queue named by that header.
//! The request's own reply and error channels travel along as
//! [`ORIGINAL_REPLY_CHANNEL`] / [`ORIGINAL_ERROR_CHANNEL`] and are restored on
//! the result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use junction_core::{
    BoxedHandler, ChannelRef, EventDrivenConsumer, FixedSubscriberChannel, Lifecycle, Message,
    MessageBuilder, MessageHandler, MessagingError, MessagingResult, PollableChannel,
    PollingConsumer, QueueChannel, StreamConsumer, StreamableChannel, SubscribableChannel,
    handler_fn, names,
};
use tracing::{debug, trace};

use crate::roles::{Gatherer, Scatterer};

/// Header naming the per-request channel that receives the gathered result.
pub const GATHER_RESULT_CHANNEL: &str = "gatherResultChannel";

/// Header carrying the request's reply channel while the scatter runs.
pub const ORIGINAL_REPLY_CHANNEL: &str = "originalReplyChannel";

/// Header carrying the request's error channel while the scatter runs.
pub const ORIGINAL_ERROR_CHANNEL: &str = "originalErrorChannel";

/// Default time to wait for the gathered result.
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Configuration types
// ============================================================================

/// The scatter side of a scatter-gather.
pub enum Scatter {
    /// A scatterer, invoked directly on the requesting task.
    Router(Arc<dyn Scatterer>),
    /// A channel that distributes by itself, typically publish-subscribe.
    Channel(ChannelRef),
}

enum GatherChannelKind {
    Subscribable(Arc<dyn SubscribableChannel>),
    Pollable(Arc<dyn PollableChannel>),
    Stream(Arc<dyn StreamableChannel>),
}

/// A channel the recipients reply to, consumed by the gatherer.
///
/// The constructor picks the endpoint type that consumes it.
pub struct GatherChannel {
    channel: ChannelRef,
    kind: GatherChannelKind,
}

impl GatherChannel {
    /// A subscribable gather channel, consumed by an [`EventDrivenConsumer`].
    pub fn subscribable<C: SubscribableChannel + 'static>(channel: Arc<C>) -> Self {
        Self {
            channel: channel.clone(),
            kind: GatherChannelKind::Subscribable(channel),
        }
    }

    /// A pollable gather channel, consumed by a [`PollingConsumer`].
    pub fn pollable<C: PollableChannel + 'static>(channel: Arc<C>) -> Self {
        Self {
            channel: channel.clone(),
            kind: GatherChannelKind::Pollable(channel),
        }
    }

    /// A streamable gather channel, consumed by a [`StreamConsumer`].
    pub fn stream<C: StreamableChannel + 'static>(channel: Arc<C>) -> Self {
        Self {
            channel: channel.clone(),
            kind: GatherChannelKind::Stream(channel),
        }
    }

    fn endpoint(self, handler: BoxedHandler, receive_timeout: Duration) -> (ChannelRef, Box<dyn Lifecycle>) {
        let endpoint: Box<dyn Lifecycle> = match self.kind {
            GatherChannelKind::Subscribable(c) => Box::new(EventDrivenConsumer::new(c, handler)),
            GatherChannelKind::Pollable(c) => {
                Box::new(PollingConsumer::new(c, handler).with_receive_timeout(receive_timeout))
            }
            GatherChannelKind::Stream(c) => Box::new(StreamConsumer::new(c, handler)),
        };
        (self.channel, endpoint)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ScatterGatherHandler`].
pub struct ScatterGatherBuilder {
    scatter: Scatter,
    gatherer: Arc<dyn Gatherer>,
    gather_channel: Option<GatherChannel>,
    gather_timeout: Duration,
    error_channel: Option<ChannelRef>,
    output_channel: Option<ChannelRef>,
    requires_reply: bool,
    auto_startup: bool,
}

impl ScatterGatherBuilder {
    /// Sets the channel recipients reply to.
    ///
    /// Without one, replies go straight into the gatherer on the replying task.
    pub fn with_gather_channel(mut self, channel: GatherChannel) -> Self {
        self.gather_channel = Some(channel);
        self
    }

    /// Sets how long to wait for the gathered result.
    pub fn with_gather_timeout(mut self, timeout: Duration) -> Self {
        self.gather_timeout = timeout;
        self
    }

    /// Sets the error channel stamped on scatter messages.
    pub fn with_error_channel(mut self, channel: ChannelRef) -> Self {
        self.error_channel = Some(channel);
        self
    }

    /// Sets the channel gathered replies are sent to by [`MessageHandler::handle_message`].
    pub fn with_output_channel(mut self, channel: ChannelRef) -> Self {
        self.output_channel = Some(channel);
        self
    }

    /// Fails [`MessageHandler::handle_message`] when nothing was gathered in time.
    pub fn with_requires_reply(mut self, requires_reply: bool) -> Self {
        self.requires_reply = requires_reply;
        self
    }

    /// Starts the gather endpoint on build (default `true`).
    pub fn with_auto_startup(mut self, auto_startup: bool) -> Self {
        self.auto_startup = auto_startup;
        self
    }

    /// Wires the scatter and gather sides together.
    ///
    /// Fails if the gatherer already has an output channel: its output must
    /// be owned by the scatter-gather.
    pub fn build(self) -> MessagingResult<Arc<ScatterGatherHandler>> {
        if self.gatherer.output_channel().is_some() {
            return Err(MessagingError::configuration(
                "the gatherer of a scatter-gather must not have an output channel",
            ));
        }

        let scatter_channel: ChannelRef = match self.scatter {
            Scatter::Channel(channel) => channel,
            Scatter::Router(router) => {
                Arc::new(FixedSubscriberChannel::new("scatterChannel", router.as_handler()))
            }
        };

        let gather_handler = Arc::clone(&self.gatherer).as_handler();
        let (gather_channel, gather_endpoint) = match self.gather_channel {
            Some(channel) => {
                let (channel, endpoint) = channel.endpoint(gather_handler, self.gather_timeout);
                (channel, Some(endpoint))
            }
            None => {
                let channel: ChannelRef =
                    Arc::new(FixedSubscriberChannel::new("gatherChannel", gather_handler));
                (channel, None)
            }
        };

        self.gatherer.set_output_channel(Arc::new(FixedSubscriberChannel::new(
            "gatherResultForwarder",
            result_forwarder(),
        )));

        let handler = Arc::new(ScatterGatherHandler {
            scatter_channel,
            gather_channel,
            gather_endpoint,
            gather_timeout: self.gather_timeout,
            error_channel: self.error_channel,
            output_channel: self.output_channel,
            requires_reply: self.requires_reply,
        });
        if self.auto_startup {
            handler.start();
        }
        Ok(handler)
    }
}

/// Forwards a gathered result to the channel in its `gatherResultChannel` header.
fn result_forwarder() -> BoxedHandler {
    handler_fn(|result: Message| async move {
        let Some(channel) = result.headers().channel(GATHER_RESULT_CHANNEL).cloned() else {
            return Err(MessagingError::delivery(
                result,
                format!("the gathered result has no '{GATHER_RESULT_CHANNEL}' header"),
            ));
        };
        if channel.send(result.clone(), None).await? {
            Ok(())
        } else {
            Err(MessagingError::delivery(result, "the gather result channel refused the result"))
        }
    })
}

// ============================================================================
// ScatterGatherHandler
// ============================================================================

/// Sends a request to several recipients and returns the combined reply.
pub struct ScatterGatherHandler {
    scatter_channel: ChannelRef,
    gather_channel: ChannelRef,
    gather_endpoint: Option<Box<dyn Lifecycle>>,
    gather_timeout: Duration,
    error_channel: Option<ChannelRef>,
    output_channel: Option<ChannelRef>,
    requires_reply: bool,
}

impl ScatterGatherHandler {
    /// Starts a builder.
    pub fn builder(scatter: Scatter, gatherer: Arc<dyn Gatherer>) -> ScatterGatherBuilder {
        ScatterGatherBuilder {
            scatter,
            gatherer,
            gather_channel: None,
            gather_timeout: DEFAULT_GATHER_TIMEOUT,
            error_channel: None,
            output_channel: None,
            requires_reply: false,
            auto_startup: true,
        }
    }

    /// Returns the gather timeout.
    pub fn gather_timeout(&self) -> Duration {
        self.gather_timeout
    }

    /// Scatters `request` and waits for the gathered result.
    ///
    /// Returns `None` if nothing was gathered within the gather timeout.
    pub async fn handle_request_message(&self, request: &Message) -> MessagingResult<Option<Message>> {
        let gather_result = Arc::new(QueueChannel::bounded("gatherResult", 1));

        let mut scatter = MessageBuilder::from_message(request)
            .channel_header(GATHER_RESULT_CHANNEL, gather_result.clone())
            .reply_channel(Arc::clone(&self.gather_channel));
        if let Some(channel) = request.headers().reply_channel() {
            scatter = scatter.channel_header(ORIGINAL_REPLY_CHANNEL, Arc::clone(channel));
        }
        if let Some(channel) = request.headers().error_channel() {
            scatter = scatter.channel_header(ORIGINAL_ERROR_CHANNEL, Arc::clone(channel));
        }
        scatter = match &self.error_channel {
            Some(channel) => scatter.error_channel(Arc::clone(channel)),
            None => scatter.remove_header(names::ERROR_CHANNEL),
        };
        let scatter = scatter.build();

        debug!(request = %request.id(), scatter = %scatter.id(), "Scattering request");
        if !self.scatter_channel.send(scatter.clone(), None).await? {
            return Err(MessagingError::delivery(scatter, "the scatter channel refused the request"));
        }

        let Some(gathered) = gather_result.receive(Some(self.gather_timeout)).await else {
            debug!(request = %request.id(), timeout = ?self.gather_timeout, "No result gathered in time");
            return Ok(None);
        };

        let headers = gathered.headers();
        let reply_channel = headers
            .channel(ORIGINAL_REPLY_CHANNEL)
            .or_else(|| request.headers().reply_channel())
            .cloned();
        let error_channel = headers
            .channel(ORIGINAL_ERROR_CHANNEL)
            .or_else(|| request.headers().error_channel())
            .cloned();

        let mut result = MessageBuilder::from_message(&gathered).remove_headers(&[
            GATHER_RESULT_CHANNEL,
            ORIGINAL_REPLY_CHANNEL,
            ORIGINAL_ERROR_CHANNEL,
            names::REPLY_CHANNEL,
            names::ERROR_CHANNEL,
        ]);
        if let Some(channel) = reply_channel {
            result = result.reply_channel(channel);
        }
        if let Some(channel) = error_channel {
            result = result.error_channel(channel);
        }
        trace!(request = %request.id(), "Gathered result");
        Ok(Some(result.build()))
    }
}

#[async_trait]
impl MessageHandler for ScatterGatherHandler {
    async fn handle_message(&self, message: Message) -> MessagingResult<()> {
        let Some(reply) = self.handle_request_message(&message).await? else {
            if self.requires_reply {
                return Err(MessagingError::ReplyRequired {
                    message: Box::new(message),
                });
            }
            return Ok(());
        };

        let destination = self
            .output_channel
            .clone()
            .or_else(|| reply.headers().reply_channel().cloned());
        let Some(channel) = destination else {
            return Err(MessagingError::no_destination(
                reply,
                "no output channel configured and no reply channel header",
            ));
        };
        if channel.send(reply.clone(), None).await? {
            Ok(())
        } else {
            Err(MessagingError::delivery(reply, "the reply channel refused the gathered result"))
        }
    }

    fn name(&self) -> &str {
        "scatter-gather"
    }
}

impl Lifecycle for ScatterGatherHandler {
    fn start(&self) {
        if let Some(endpoint) = &self.gather_endpoint {
            endpoint.start();
        }
    }

    fn stop(&self) {
        if let Some(endpoint) = &self.gather_endpoint {
            endpoint.stop();
        }
    }

    fn is_running(&self) -> bool {
        self.gather_endpoint
            .as_ref()
            .is_none_or(|endpoint| endpoint.is_running())
    }
}

impl std::fmt::Debug for ScatterGatherHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterGatherHandler")
            .field("scatter_channel", &self.scatter_channel.name())
            .field("gather_channel", &self.gather_channel.name())
            .field("gather_timeout", &self.gather_timeout)
            .field("has_gather_endpoint", &self.gather_endpoint.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatingMessageHandler;
    use crate::release::MessageCountReleaseStrategy;
    use crate::router::RecipientListRouter;
    use junction_core::{DirectChannel, Payload, PublishSubscribeChannel, ServiceActivatingHandler};

    fn quoting_service(name: &'static str, price: i64) -> Arc<ServiceActivatingHandler> {
        Arc::new(ServiceActivatingHandler::new(name, move |_request: Message| async move {
            Ok(Some(Payload::from(price)))
        }))
    }

    fn direct_to(handler: Arc<ServiceActivatingHandler>) -> Arc<DirectChannel> {
        let channel = Arc::new(DirectChannel::new("supplier"));
        channel.subscribe(handler);
        channel
    }

    fn gatherer() -> Arc<AggregatingMessageHandler> {
        AggregatingMessageHandler::builder()
            .with_expire_groups_upon_completion(true)
            .build()
    }

    #[tokio::test]
    async fn test_router_scatter_gathers_one_reply() {
        let router = Arc::new(
            RecipientListRouter::new("suppliers")
                .with_recipient(direct_to(quoting_service("a", 10)))
                .with_recipient(direct_to(quoting_service("b", 12)))
                .with_apply_sequence(true),
        );
        let handler = ScatterGatherHandler::builder(Scatter::Router(router), gatherer())
            .with_gather_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        let reply = handler
            .handle_request_message(&Message::new("quote"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.payload(),
            &Payload::Collection(vec![Payload::from(10_i64), Payload::from(12_i64)])
        );
        assert!(!reply.headers().contains(GATHER_RESULT_CHANNEL));
        assert!(reply.headers().reply_channel().is_none());
        assert!(handler.is_running());
    }

    #[tokio::test]
    async fn test_publish_subscribe_scatter() {
        let auction = Arc::new(PublishSubscribeChannel::new("auction").with_apply_sequence(true));
        auction.subscribe(quoting_service("a", 7));
        auction.subscribe(quoting_service("b", 9));
        auction.subscribe(quoting_service("c", 8));

        let handler = ScatterGatherHandler::builder(Scatter::Channel(auction), gatherer())
            .build()
            .unwrap();
        let reply = handler
            .handle_request_message(&Message::new("quote"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload().as_collection().map(<[Payload]>::len), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gather_timeout_yields_none() {
        let router = Arc::new(
            RecipientListRouter::new("suppliers")
                .with_recipient(direct_to(quoting_service("a", 10)))
                .with_apply_sequence(true),
        );
        let never = AggregatingMessageHandler::builder()
            .with_release_strategy(MessageCountReleaseStrategy::new(usize::MAX))
            .build();
        let handler = ScatterGatherHandler::builder(Scatter::Router(router), never)
            .with_gather_timeout(Duration::from_millis(100))
            .with_requires_reply(true)
            .build()
            .unwrap();

        let request = Message::new("quote");
        assert!(handler.handle_request_message(&request).await.unwrap().is_none());

        let err = handler.handle_message(request).await.unwrap_err();
        assert!(matches!(err, MessagingError::ReplyRequired { .. }));
    }

    #[tokio::test]
    async fn test_reply_is_sent_to_original_reply_channel() {
        let router = Arc::new(
            RecipientListRouter::new("suppliers")
                .with_recipient(direct_to(quoting_service("a", 10)))
                .with_apply_sequence(true),
        );
        let handler = ScatterGatherHandler::builder(Scatter::Router(router), gatherer())
            .build()
            .unwrap();

        let replies = Arc::new(QueueChannel::new("replies"));
        let request = MessageBuilder::with_payload("quote")
            .reply_channel(replies.clone())
            .build();
        handler.handle_message(request).await.unwrap();

        let reply = replies.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(reply.payload().as_collection().map(<[Payload]>::len), Some(1));
        assert!(junction_core::same_channel(
            reply.headers().reply_channel().unwrap(),
            &(replies.clone() as ChannelRef)
        ));
    }

    #[tokio::test]
    async fn test_gatherer_with_output_channel_is_rejected() {
        let router = Arc::new(RecipientListRouter::new("suppliers"));
        let configured = AggregatingMessageHandler::builder()
            .with_output_channel(Arc::new(QueueChannel::new("elsewhere")))
            .build();

        let err = ScatterGatherHandler::builder(Scatter::Router(router), configured)
            .build()
            .unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pollable_gather_channel_runs_polling_endpoint() {
        let router = Arc::new(
            RecipientListRouter::new("suppliers")
                .with_recipient(direct_to(quoting_service("a", 1)))
                .with_recipient(direct_to(quoting_service("b", 2)))
                .with_apply_sequence(true),
        );
        let gather = Arc::new(QueueChannel::new("gather"));
        let handler = ScatterGatherHandler::builder(Scatter::Router(router), gatherer())
            .with_gather_channel(GatherChannel::pollable(gather))
            .with_gather_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert!(handler.is_running());

        let reply = handler
            .handle_request_message(&Message::new("quote"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload().as_collection().map(<[Payload]>::len), Some(2));

        handler.stop();
        assert!(!handler.is_running());
    }
}
