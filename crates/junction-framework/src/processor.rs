//! Group processors turn a released group into the output message.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use junction_core::{BoxError, ChannelRef, Message, MessageBuilder, Payload, names, same_channel};
use serde_json::Value;

use crate::group::MessageGroup;

/// Produces the output message of a released group.
#[async_trait]
pub trait MessageGroupProcessor: Send + Sync {
    /// Combines the messages of `group` into one message.
    async fn process_group(&self, group: &MessageGroup) -> Result<Message, BoxError>;
}

/// Headers never carried over from group members to the aggregate.
const NON_AGGREGATED_HEADERS: [&str; 4] = [
    names::ID,
    names::TIMESTAMP,
    names::SEQUENCE_NUMBER,
    names::SEQUENCE_SIZE,
];

enum Slot<T> {
    Agreed(T),
    Conflict,
}

/// Computes the headers shared by all messages of a group.
///
/// A header is kept if every message that carries it carries the same value
/// (channel headers compare by identity). Conflicting headers are dropped,
/// as are the id, timestamp and sequence headers.
pub fn aggregate_headers(group: &MessageGroup) -> MessageBuilder {
    let mut values: BTreeMap<&str, Slot<&Value>> = BTreeMap::new();
    let mut channels: BTreeMap<&str, Slot<&ChannelRef>> = BTreeMap::new();

    for message in group.messages() {
        for (name, value) in message.headers().values() {
            values
                .entry(name)
                .and_modify(|slot| {
                    if let Slot::Agreed(existing) = slot
                        && *existing != value
                    {
                        *slot = Slot::Conflict;
                    }
                })
                .or_insert(Slot::Agreed(value));
        }
        for (name, channel) in message.headers().channels() {
            channels
                .entry(name)
                .and_modify(|slot| {
                    if let Slot::Agreed(existing) = slot
                        && !same_channel(*existing, channel)
                    {
                        *slot = Slot::Conflict;
                    }
                })
                .or_insert(Slot::Agreed(channel));
        }
    }

    let mut builder = MessageBuilder::with_payload(Payload::Collection(Vec::new()));
    for (name, slot) in values {
        if let Slot::Agreed(value) = slot
            && !NON_AGGREGATED_HEADERS.contains(&name)
        {
            builder = builder.header(name, value.clone());
        }
    }
    for (name, slot) in channels {
        if let Slot::Agreed(channel) = slot {
            builder = builder.channel_header(name, Arc::clone(channel));
        }
    }
    builder
}

/// Collects the payloads of all messages, in arrival order, into a
/// [`Payload::Collection`] carrying the aggregated headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAggregatingProcessor;

#[async_trait]
impl MessageGroupProcessor for DefaultAggregatingProcessor {
    async fn process_group(&self, group: &MessageGroup) -> Result<Message, BoxError> {
        let payloads = group
            .messages()
            .iter()
            .map(|m| m.payload().clone())
            .collect::<Vec<_>>();
        Ok(aggregate_headers(group).payload(payloads).build())
    }
}

type GroupFn = dyn Fn(&MessageGroup) -> Result<Payload, BoxError> + Send + Sync;

/// Computes the aggregate payload with a closure; headers are aggregated
/// as by [`DefaultAggregatingProcessor`].
pub struct FnGroupProcessor {
    f: Arc<GroupFn>,
}

impl FnGroupProcessor {
    /// Wraps `f`.
    pub fn new(f: impl Fn(&MessageGroup) -> Result<Payload, BoxError> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl MessageGroupProcessor for FnGroupProcessor {
    async fn process_group(&self, group: &MessageGroup) -> Result<Message, BoxError> {
        let payload = (self.f)(group)?;
        Ok(aggregate_headers(group).payload(payload).build())
    }
}
