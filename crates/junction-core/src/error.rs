//! Unified error types for the Junction core.
//!
//! Every variant that concerns a specific message carries that message, so
//! downstream error flows can correlate a failure back to its input.
//! Store and configuration errors live in the crates that own them.

use thiserror::Error;

use crate::foundation::message::Message;

/// Boxed error used for failures raised by user-supplied strategies and services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Messaging Errors
// =============================================================================

/// Errors that can occur while sending, dispatching or handling messages.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// A handler failed while processing the message.
    #[error("failed to handle message {}: {source}", .message.id())]
    Handling {
        /// The message being handled.
        message: Box<Message>,
        /// The underlying failure.
        source: BoxError,
    },

    /// The message could not be delivered to its destination.
    #[error("failed to deliver message {}: {reason}", .message.id())]
    Delivery {
        /// The undeliverable message.
        message: Box<Message>,
        /// Reason for failure.
        reason: String,
    },

    /// No output channel was configured and the message has no reply channel.
    #[error("no destination for message {}: {reason}", .message.id())]
    DestinationResolution {
        /// The message without a destination.
        message: Box<Message>,
        /// Reason for failure.
        reason: String,
    },

    /// A dispatcher could not hand the message to any subscriber.
    #[error("dispatch of message {} failed: {reason}", .message.id())]
    Dispatch {
        /// The message being dispatched.
        message: Box<Message>,
        /// Reason for failure.
        reason: String,
    },

    /// A handler declined the message; dispatchers may fail over to the next handler.
    #[error("message {} rejected: {reason}", .message.id())]
    Rejected {
        /// The rejected message.
        message: Box<Message>,
        /// Reason for rejection.
        reason: String,
    },

    /// A reply-producing component was required to reply and did not.
    #[error("no reply produced for message {}", .message.id())]
    ReplyRequired {
        /// The request message.
        message: Box<Message>,
    },

    /// A gateway-style caller gave up waiting for a reply.
    #[error("timed out waiting for a reply to message {}", .message.id())]
    Timeout {
        /// The request message.
        message: Box<Message>,
    },

    /// A component was used in a state that does not permit the operation.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Invalid component wiring, detected when a component is built.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl MessagingError {
    /// Wraps `source` as a handling failure for `message`.
    pub fn handling(message: Message, source: impl Into<BoxError>) -> Self {
        Self::Handling {
            message: Box::new(message),
            source: source.into(),
        }
    }

    /// Creates a delivery error.
    pub fn delivery(message: Message, reason: impl Into<String>) -> Self {
        Self::Delivery {
            message: Box::new(message),
            reason: reason.into(),
        }
    }

    /// Creates a dispatch error.
    pub fn dispatch(message: Message, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            message: Box::new(message),
            reason: reason.into(),
        }
    }

    /// Creates a rejection, signalling that another handler may take the message.
    pub fn rejected(message: Message, reason: impl Into<String>) -> Self {
        Self::Rejected {
            message: Box::new(message),
            reason: reason.into(),
        }
    }

    /// Creates a destination-resolution error.
    pub fn no_destination(message: Message, reason: impl Into<String>) -> Self {
        Self::DestinationResolution {
            message: Box::new(message),
            reason: reason.into(),
        }
    }

    /// Creates an illegal-state error.
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns the message this failure is about, if it carries one.
    pub fn failed_message(&self) -> Option<&Message> {
        match self {
            Self::Handling { message, .. }
            | Self::Delivery { message, .. }
            | Self::DestinationResolution { message, .. }
            | Self::Dispatch { message, .. }
            | Self::Rejected { message, .. }
            | Self::ReplyRequired { message }
            | Self::Timeout { message } => Some(message),
            Self::IllegalState(_) | Self::Configuration(_) => None,
        }
    }

    /// Returns `true` if this is a rejection rather than a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for messaging operations.
pub type MessagingResult<T> = Result<T, MessagingError>;
