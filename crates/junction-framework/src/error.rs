//! Error types for message-group stores.

use junction_core::{Message, MessagingError};
use thiserror::Error;

use crate::correlation::CorrelationKey;

/// Errors raised by a [`MessageGroupStore`](crate::store::MessageGroupStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A group could not be encoded or decoded.
    #[error("failed to (de)serialize group '{key}': {source}")]
    Serialization {
        /// Key of the affected group.
        key: CorrelationKey,
        /// Underlying serde failure.
        source: serde_json::Error,
    },

    /// The storage backend reported a failure.
    #[error("store backend error: {0}")]
    Backend(String),

    /// File I/O failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The group already holds the maximum number of messages.
    #[error("group '{key}' is at capacity ({capacity} messages)")]
    CapacityExceeded {
        /// Key of the full group.
        key: CorrelationKey,
        /// Configured capacity.
        capacity: usize,
    },
}

impl StoreError {
    /// Creates a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Converts this error into a handling failure for `message`.
    pub fn into_messaging(self, message: Message) -> MessagingError {
        MessagingError::handling(message, self)
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
