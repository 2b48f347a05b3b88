//! Builder for [`Message`]s.
//!
//! Every built message receives a fresh id and timestamp; `id` and
//! `timestamp` can never be set or copied through the builder.

use std::collections::BTreeMap;

use serde_json::Value;

use super::headers::{MessageHeaders, names};
use super::message::{Message, Payload};
use crate::channel::ChannelRef;

/// Builds messages, either from scratch or as modified copies of existing ones.
///
/// ```rust,ignore
/// let reply = MessageBuilder::with_payload("pong")
///     .copy_headers(request.headers())
///     .header("handledBy", "pinger")
///     .build();
/// ```
#[derive(Clone)]
pub struct MessageBuilder {
    payload: Payload,
    values: BTreeMap<String, Value>,
    channels: BTreeMap<String, ChannelRef>,
}

impl MessageBuilder {
    /// Starts a message with the given payload and no headers.
    pub fn with_payload(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            values: BTreeMap::new(),
            channels: BTreeMap::new(),
        }
    }

    /// Starts a copy of `message`: same payload and headers, new id and timestamp.
    pub fn from_message(message: &Message) -> Self {
        Self::with_payload(message.payload().clone()).copy_headers(message.headers())
    }

    /// Replaces the payload.
    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets a JSON-valued header, replacing any channel header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if is_reserved(&name) {
            return self;
        }
        self.channels.remove(&name);
        self.values.insert(name, value.into());
        self
    }

    /// Sets a header only if no header with that name exists yet.
    pub fn header_if_absent(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if self.values.contains_key(&name) || self.channels.contains_key(&name) {
            self
        } else {
            self.header(name, value)
        }
    }

    /// Sets a channel header, replacing any JSON header of the same name.
    pub fn channel_header(mut self, name: impl Into<String>, channel: ChannelRef) -> Self {
        let name = name.into();
        if is_reserved(&name) {
            return self;
        }
        self.values.remove(&name);
        self.channels.insert(name, channel);
        self
    }

    /// Removes a header from both sections.
    pub fn remove_header(mut self, name: &str) -> Self {
        self.values.remove(name);
        self.channels.remove(name);
        self
    }

    /// Removes several headers from both sections.
    pub fn remove_headers(mut self, names: &[&str]) -> Self {
        for name in names {
            self.values.remove(*name);
            self.channels.remove(*name);
        }
        self
    }

    /// Copies all headers except `id` and `timestamp`, overwriting existing ones.
    pub fn copy_headers(mut self, headers: &MessageHeaders) -> Self {
        for (name, value) in headers.raw_values() {
            self.channels.remove(name);
            self.values.insert(name.clone(), value.clone());
        }
        for (name, channel) in headers.raw_channels() {
            self.values.remove(name);
            self.channels.insert(name.clone(), channel.clone());
        }
        self
    }

    /// Copies headers that are not already present.
    pub fn copy_headers_if_absent(mut self, headers: &MessageHeaders) -> Self {
        for (name, value) in headers.raw_values() {
            if !self.channels.contains_key(name) {
                self.values.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        for (name, channel) in headers.raw_channels() {
            if !self.values.contains_key(name) {
                self.channels
                    .entry(name.clone())
                    .or_insert_with(|| channel.clone());
            }
        }
        self
    }

    /// Sets the reply channel.
    pub fn reply_channel(self, channel: ChannelRef) -> Self {
        self.channel_header(names::REPLY_CHANNEL, channel)
    }

    /// Sets the error channel.
    pub fn error_channel(self, channel: ChannelRef) -> Self {
        self.channel_header(names::ERROR_CHANNEL, channel)
    }

    /// Sets the correlation id.
    pub fn correlation_id(self, id: impl Into<Value>) -> Self {
        self.header(names::CORRELATION_ID, id)
    }

    /// Sets the sequence number and sequence size.
    pub fn sequence(self, number: u64, size: u64) -> Self {
        self.header(names::SEQUENCE_NUMBER, number)
            .header(names::SEQUENCE_SIZE, size)
    }

    /// Builds the message.
    pub fn build(self) -> Message {
        Message::from_parts(
            self.payload,
            MessageHeaders::new(self.values, self.channels),
        )
    }
}

fn is_reserved(name: &str) -> bool {
    name == names::ID || name == names::TIMESTAMP
}
