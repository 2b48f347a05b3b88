//! Message headers.
//!
//! Headers come in two sections. JSON-valued headers are serializable and
//! survive persistence. Channel headers hold live [`ChannelRef`]s (reply
//! channel, error channel and any component-specific channels); they are
//! transient, compare by identity and are never serialized.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::ChannelRef;

/// Well-known header names.
pub mod names {
    /// Unique message identifier.
    pub const ID: &str = "id";
    /// Creation time in epoch milliseconds.
    pub const TIMESTAMP: &str = "timestamp";
    /// Correlation identifier used to group related messages.
    pub const CORRELATION_ID: &str = "correlationId";
    /// Position of the message within its sequence (1-based).
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
    /// Number of messages in the sequence.
    pub const SEQUENCE_SIZE: &str = "sequenceSize";
    /// Channel that should receive the reply.
    pub const REPLY_CHANNEL: &str = "replyChannel";
    /// Channel that should receive error messages.
    pub const ERROR_CHANNEL: &str = "errorChannel";
}

/// Returns the current wall-clock time in epoch milliseconds.
pub fn current_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Immutable header set of a [`Message`](super::message::Message).
///
/// Use [`MessageBuilder`](super::builder::MessageBuilder) to derive modified copies.
#[derive(Clone, Serialize, Deserialize)]
pub struct MessageHeaders {
    id: Uuid,
    timestamp: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, Value>,
    #[serde(skip)]
    channels: BTreeMap<String, ChannelRef>,
}

impl MessageHeaders {
    pub(crate) fn new(
        values: BTreeMap<String, Value>,
        channels: BTreeMap<String, ChannelRef>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: current_time_millis(),
            values,
            channels,
        }
    }

    /// Returns the unique message id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the creation timestamp in epoch milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns a JSON-valued header.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns a header as a string slice if it holds a JSON string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Returns a header as `u64` if it holds a non-negative integer.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    /// Returns a channel header.
    pub fn channel(&self, name: &str) -> Option<&ChannelRef> {
        self.channels.get(name)
    }

    /// Returns `true` if a header with this name exists in either section.
    pub fn contains(&self, name: &str) -> bool {
        matches!(name, names::ID | names::TIMESTAMP)
            || self.values.contains_key(name)
            || self.channels.contains_key(name)
    }

    /// Returns the correlation id header.
    pub fn correlation_id(&self) -> Option<&Value> {
        self.get(names::CORRELATION_ID).filter(|v| !v.is_null())
    }

    /// Returns the sequence number header.
    pub fn sequence_number(&self) -> Option<u64> {
        self.get_u64(names::SEQUENCE_NUMBER)
    }

    /// Returns the sequence size header.
    pub fn sequence_size(&self) -> Option<u64> {
        self.get_u64(names::SEQUENCE_SIZE)
    }

    /// Returns the reply channel header.
    pub fn reply_channel(&self) -> Option<&ChannelRef> {
        self.channel(names::REPLY_CHANNEL)
    }

    /// Returns the error channel header.
    pub fn error_channel(&self) -> Option<&ChannelRef> {
        self.channel(names::ERROR_CHANNEL)
    }

    /// Iterates over the JSON-valued headers.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over the channel headers.
    pub fn channels(&self) -> impl Iterator<Item = (&str, &ChannelRef)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn raw_values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub(crate) fn raw_channels(&self) -> &BTreeMap<String, ChannelRef> {
        &self.channels
    }
}

/// Returns `true` if both references point at the same channel instance.
pub fn same_channel(a: &ChannelRef, b: &ChannelRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl PartialEq for MessageHeaders {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.timestamp == other.timestamp
            && self.values == other.values
            && self.channels.len() == other.channels.len()
            && self
                .channels
                .iter()
                .zip(other.channels.iter())
                .all(|((ka, a), (kb, b))| ka == kb && same_channel(a, b))
    }
}

impl fmt::Debug for MessageHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: BTreeMap<&str, &str> = self
            .channels
            .iter()
            .map(|(k, v)| (k.as_str(), v.name()))
            .collect();
        f.debug_struct("MessageHeaders")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("values", &self.values)
            .field("channels", &channels)
            .finish()
    }
}
