//! Endpoints connect a channel to a handler and own the consuming task.
//!
//! | Endpoint | Channel | Consumption |
//! |----------|---------|-------------|
//! | [`EventDrivenConsumer`] | [`SubscribableChannel`] | subscribes the handler on start |
//! | [`PollingConsumer`] | [`PollableChannel`] | spawned task polling with a receive timeout |
//! | [`StreamConsumer`] | [`StreamableChannel`] | spawned task draining a stream |
//!
//! Failures raised by a handler inside a spawned task have no caller to
//! return to. They are published as error messages to the failed message's
//! error channel, or logged when it has none.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{PollableChannel, StreamableChannel, SubscribableChannel};
use crate::error::MessagingError;
use crate::foundation::Message;
use crate::handler::BoxedHandler;

/// Default time a polling consumer waits in each receive call.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Lifecycle
// ============================================================================

/// A component that can be started and stopped.
///
/// Both operations are idempotent. Starting a task-backed endpoint requires
/// a Tokio runtime context.
pub trait Lifecycle: Send + Sync {
    /// Starts the component.
    fn start(&self);

    /// Stops the component.
    fn stop(&self);

    /// Returns `true` while the component is running.
    fn is_running(&self) -> bool;
}

/// Publishes a handler failure to the failed message's error channel.
///
/// Failures without a message, or whose message has no error channel, are
/// logged instead.
pub async fn publish_error(endpoint: &str, err: MessagingError) {
    let Some(failed) = err.failed_message() else {
        error!(endpoint, error = %err, "Handler failed");
        return;
    };
    let Some(channel) = failed.headers().error_channel().cloned() else {
        error!(endpoint, id = %failed.id(), error = %err, "Handler failed");
        return;
    };

    let error_message = Message::error_for(failed, err.to_string());
    match channel.send(error_message, None).await {
        Ok(true) => debug!(endpoint, channel = channel.name(), "Published error message"),
        Ok(false) => warn!(endpoint, channel = channel.name(), error = %err, "Error channel refused error message"),
        Err(send_err) => {
            error!(endpoint, error = %err, send_error = %send_err, "Failed to publish error message");
        }
    }
}

// ============================================================================
// EventDrivenConsumer
// ============================================================================

/// Subscribes a handler to a subscribable channel while running.
pub struct EventDrivenConsumer {
    channel: Arc<dyn SubscribableChannel>,
    handler: BoxedHandler,
    running: AtomicBool,
}

impl EventDrivenConsumer {
    /// Creates a stopped consumer.
    pub fn new(channel: Arc<dyn SubscribableChannel>, handler: BoxedHandler) -> Self {
        Self {
            channel,
            handler,
            running: AtomicBool::new(false),
        }
    }
}

impl Lifecycle for EventDrivenConsumer {
    fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.channel.subscribe(Arc::clone(&self.handler));
            debug!(channel = self.channel.name(), handler = self.handler.name(), "Consumer subscribed");
        }
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.channel.unsubscribe(&self.handler);
            debug!(channel = self.channel.name(), handler = self.handler.name(), "Consumer unsubscribed");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Task-backed consumers
// ============================================================================

/// A running consumer task and the token that stops it.
struct Worker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Worker {
    fn is_alive(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

/// Polls a pollable channel on a spawned task and hands each message to a handler.
pub struct PollingConsumer {
    channel: Arc<dyn PollableChannel>,
    handler: BoxedHandler,
    receive_timeout: Duration,
    worker: Mutex<Option<Worker>>,
}

impl PollingConsumer {
    /// Creates a stopped consumer with [`DEFAULT_RECEIVE_TIMEOUT`].
    pub fn new(channel: Arc<dyn PollableChannel>, handler: BoxedHandler) -> Self {
        Self {
            channel,
            handler,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            worker: Mutex::new(None),
        }
    }

    /// Sets how long each receive call waits.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

impl Lifecycle for PollingConsumer {
    fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(Worker::is_alive) {
            return;
        }

        let token = CancellationToken::new();
        let channel = Arc::clone(&self.channel);
        let handler = Arc::clone(&self.handler);
        let timeout = self.receive_timeout;
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            info!(channel = channel.name(), handler = handler.name(), "Polling consumer started");
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    received = channel.receive(Some(timeout)) => {
                        if let Some(message) = received
                            && let Err(e) = handler.handle_message(message).await
                        {
                            publish_error(handler.name(), e).await;
                        }
                    }
                }
            }
            info!(channel = channel.name(), "Polling consumer stopped");
        });

        *worker = Some(Worker { token, task });
    }

    fn stop(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.token.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_alive)
    }
}

/// Drains a stream opened on a streamable channel on a spawned task.
///
/// The stream is opened on [`start`](Lifecycle::start); messages sent before
/// that are not observed.
pub struct StreamConsumer {
    channel: Arc<dyn StreamableChannel>,
    handler: BoxedHandler,
    worker: Mutex<Option<Worker>>,
}

impl StreamConsumer {
    /// Creates a stopped consumer.
    pub fn new(channel: Arc<dyn StreamableChannel>, handler: BoxedHandler) -> Self {
        Self {
            channel,
            handler,
            worker: Mutex::new(None),
        }
    }
}

impl Lifecycle for StreamConsumer {
    fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(Worker::is_alive) {
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handler = Arc::clone(&self.handler);
        let mut stream = self.channel.subscribe_stream();
        let name = self.channel.name().to_string();

        let task = tokio::spawn(async move {
            debug!(channel = %name, handler = handler.name(), "Stream consumer started");
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    next = stream.next() => match next {
                        Some(message) => {
                            if let Err(e) = handler.handle_message(message).await {
                                publish_error(handler.name(), e).await;
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!(channel = %name, "Stream consumer stopped");
        });

        *worker = Some(Worker { token, task });
    }

    fn stop(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.token.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_alive)
    }
}
