//! Message dispatchers for subscribable channels.
//!
//! A [`UnicastingDispatcher`] hands each message to exactly one handler. With
//! a [`LoadBalancingStrategy`] the starting handler rotates per message; with
//! failover enabled, a handler that rejects or fails is skipped and the next
//! one in rotation order gets the message.
//!
//! Each attempt is classified as a [`DispatchOutcome`] and the dispatch loop
//! branches on that value:
//!
//! ```text
//! message ──▶ [h1: Rejected] ──▶ [h2: Accepted] ──▶ done
//!                 (failover)
//! ```
//!
//! A [`BroadcastingDispatcher`] hands each message to every handler.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{MessagingError, MessagingResult};
use crate::foundation::{Message, MessageBuilder};
use crate::handler::{BoxedHandler, same_handler};

/// Result of offering a message to one handler.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The handler processed the message.
    Accepted,
    /// The handler declined the message.
    Rejected(MessagingError),
    /// The handler failed while processing the message.
    Failed(MessagingError),
}

impl DispatchOutcome {
    /// Classifies a handler result.
    pub fn from_result(result: MessagingResult<()>) -> Self {
        match result {
            Ok(()) => Self::Accepted,
            Err(e) if e.is_rejection() => Self::Rejected(e),
            Err(e) => Self::Failed(e),
        }
    }
}

/// Orders the handlers a message is offered to.
pub trait LoadBalancingStrategy: Send + Sync {
    /// Returns the handlers in the order they should be tried for the next message.
    fn order(&self, handlers: &[BoxedHandler]) -> Vec<BoxedHandler>;
}

/// Rotates the starting handler by one for every message.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Creates a strategy starting at the first handler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancingStrategy for RoundRobinStrategy {
    fn order(&self, handlers: &[BoxedHandler]) -> Vec<BoxedHandler> {
        if handlers.is_empty() {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % handlers.len();
        handlers[start..]
            .iter()
            .chain(handlers[..start].iter())
            .cloned()
            .collect()
    }
}

// ============================================================================
// Handler registry shared by both dispatchers
// ============================================================================

#[derive(Default)]
struct Subscribers {
    handlers: RwLock<Vec<BoxedHandler>>,
}

impl Subscribers {
    fn add(&self, handler: BoxedHandler) -> bool {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    fn remove(&self, handler: &BoxedHandler) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        handlers.len() != before
    }

    fn snapshot(&self) -> Vec<BoxedHandler> {
        self.handlers.read().clone()
    }

    fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

// ============================================================================
// UnicastingDispatcher
// ============================================================================

/// Dispatches each message to a single handler.
pub struct UnicastingDispatcher {
    subscribers: Subscribers,
    strategy: Option<Box<dyn LoadBalancingStrategy>>,
    failover: bool,
}

impl Default for UnicastingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UnicastingDispatcher {
    /// Creates a round-robin dispatcher with failover.
    pub fn new() -> Self {
        Self {
            subscribers: Subscribers::default(),
            strategy: Some(Box::new(RoundRobinStrategy::new())),
            failover: true,
        }
    }

    /// Replaces the load-balancing strategy; `None` always starts at the first handler.
    pub fn with_strategy(mut self, strategy: Option<Box<dyn LoadBalancingStrategy>>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enables or disables failover to the next handler.
    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    /// Adds a handler.
    pub fn add_handler(&self, handler: BoxedHandler) -> bool {
        self.subscribers.add(handler)
    }

    /// Removes a handler.
    pub fn remove_handler(&self, handler: &BoxedHandler) -> bool {
        self.subscribers.remove(handler)
    }

    /// Returns the number of handlers.
    pub fn handler_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Dispatches a message.
    ///
    /// Returns `Ok(true)` once a handler accepts it. If every attempt fails,
    /// a single failure is returned as-is and several are folded into one
    /// [`MessagingError::Dispatch`].
    pub async fn dispatch(&self, message: Message) -> MessagingResult<bool> {
        let handlers = self.subscribers.snapshot();
        if handlers.is_empty() {
            return Err(MessagingError::dispatch(
                message,
                "dispatcher has no subscribers",
            ));
        }
        let ordered = match &self.strategy {
            Some(strategy) => strategy.order(&handlers),
            None => handlers,
        };

        let mut failures = Vec::new();
        for handler in ordered {
            match DispatchOutcome::from_result(handler.handle_message(message.clone()).await) {
                DispatchOutcome::Accepted => {
                    trace!(handler = handler.name(), id = %message.id(), "Message accepted");
                    return Ok(true);
                }
                DispatchOutcome::Rejected(e) => {
                    debug!(handler = handler.name(), error = %e, "Handler rejected message");
                    failures.push(e);
                }
                DispatchOutcome::Failed(e) => {
                    debug!(handler = handler.name(), error = %e, "Handler failed");
                    failures.push(e);
                }
            }
            if !self.failover {
                break;
            }
        }

        if failures.len() == 1 {
            if let Some(e) = failures.pop() {
                return Err(e);
            }
        }
        let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
        Err(MessagingError::dispatch(
            message,
            format!("all {} handlers failed: {}", reasons.len(), reasons.join("; ")),
        ))
    }
}

impl std::fmt::Debug for UnicastingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnicastingDispatcher")
            .field("handler_count", &self.handler_count())
            .field("load_balancing", &self.strategy.is_some())
            .field("failover", &self.failover)
            .finish()
    }
}

// ============================================================================
// BroadcastingDispatcher
// ============================================================================

/// Dispatches each message to every handler.
///
/// With `apply_sequence`, each copy carries the original id as correlation id
/// plus its sequence number and the subscriber count as sequence size, so the
/// copies can be aggregated again downstream.
#[derive(Default)]
pub struct BroadcastingDispatcher {
    subscribers: Subscribers,
    apply_sequence: bool,
    ignore_failures: bool,
}

impl BroadcastingDispatcher {
    /// Creates a broadcasting dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps correlation and sequence headers on each copy.
    pub fn with_apply_sequence(mut self, apply_sequence: bool) -> Self {
        self.apply_sequence = apply_sequence;
        self
    }

    /// Keeps delivering to the remaining handlers when one fails.
    pub fn with_ignore_failures(mut self, ignore_failures: bool) -> Self {
        self.ignore_failures = ignore_failures;
        self
    }

    /// Adds a handler.
    pub fn add_handler(&self, handler: BoxedHandler) -> bool {
        self.subscribers.add(handler)
    }

    /// Removes a handler.
    pub fn remove_handler(&self, handler: &BoxedHandler) -> bool {
        self.subscribers.remove(handler)
    }

    /// Returns the number of handlers.
    pub fn handler_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Dispatches a copy of the message to every handler.
    pub async fn dispatch(&self, message: Message) -> MessagingResult<bool> {
        let handlers = self.subscribers.snapshot();
        let size = handlers.len() as u64;

        for (index, handler) in handlers.into_iter().enumerate() {
            let copy = if self.apply_sequence {
                MessageBuilder::from_message(&message)
                    .correlation_id(message.id().to_string())
                    .sequence(index as u64 + 1, size)
                    .build()
            } else {
                message.clone()
            };

            if let Err(e) = handler.handle_message(copy).await {
                if self.ignore_failures {
                    warn!(handler = handler.name(), error = %e, "Ignoring broadcast failure");
                } else {
                    return Err(e);
                }
            }
        }
        Ok(true)
    }
}
