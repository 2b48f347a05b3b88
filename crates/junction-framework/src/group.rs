//! Message groups: the unit of correlation state.

use junction_core::{Message, current_time_millis};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationKey;

/// Messages sharing a correlation key, in arrival order.
///
/// Groups are owned by a [`MessageGroupStore`](crate::store::MessageGroupStore);
/// handlers receive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageGroup {
    key: CorrelationKey,
    messages: Vec<Message>,
    created_at: u64,
    last_modified: u64,
    #[serde(default)]
    complete: bool,
    #[serde(default)]
    last_released_sequence: u64,
}

impl MessageGroup {
    /// Creates an empty group.
    pub fn new(key: CorrelationKey) -> Self {
        let now = current_time_millis();
        Self {
            key,
            messages: Vec::new(),
            created_at: now,
            last_modified: now,
            complete: false,
            last_released_sequence: 0,
        }
    }

    /// Returns the correlation key.
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Returns the messages in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the first message, if any.
    pub fn one(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// Returns the number of messages.
    pub fn size(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the group holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the sequence size declared by the first message.
    pub fn sequence_size(&self) -> Option<u64> {
        self.one().and_then(|m| m.headers().sequence_size())
    }

    /// Returns the creation time in epoch millis.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Returns the time of the last change in epoch millis.
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    /// Returns `true` once the group was released and kept for late-arrival detection.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the highest sequence number released so far.
    pub fn last_released_sequence(&self) -> u64 {
        self.last_released_sequence
    }

    /// Returns `true` if a message with the same sequence number is already present.
    pub fn contains_sequence(&self, sequence_number: u64) -> bool {
        self.messages
            .iter()
            .any(|m| m.headers().sequence_number() == Some(sequence_number))
    }

    // ------------------------------------------------------------------------
    // Mutators used by stores
    // ------------------------------------------------------------------------

    /// Appends a message.
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Removes the messages with the given ids; returns how many were removed.
    pub fn remove(&mut self, ids: &[Uuid]) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !ids.contains(&m.id()));
        let removed = before - self.messages.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Marks the group complete.
    pub fn set_complete(&mut self) {
        self.complete = true;
        self.touch();
    }

    /// Records the highest released sequence number.
    pub fn set_last_released_sequence(&mut self, sequence: u64) {
        self.last_released_sequence = sequence;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_modified = current_time_millis().max(self.last_modified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::MessageBuilder;

    #[test]
    fn test_sequence_size_comes_from_first_message() {
        let mut group = MessageGroup::new("k".into());
        assert_eq!(group.sequence_size(), None);

        group.add(MessageBuilder::with_payload(1_i64).sequence(1, 3).build());
        group.add(MessageBuilder::with_payload(2_i64).sequence(2, 5).build());
        assert_eq!(group.sequence_size(), Some(3));
        assert!(group.contains_sequence(2));
        assert!(!group.contains_sequence(3));
    }

    #[test]
    fn test_remove_by_id() {
        let mut group = MessageGroup::new("k".into());
        let keep = Message::new("keep");
        let drop = Message::new("drop");
        let drop_id = drop.id();
        group.add(keep.clone());
        group.add(drop);

        assert_eq!(group.remove(&[drop_id]), 1);
        assert_eq!(group.messages(), &[keep]);
        assert_eq!(group.remove(&[drop_id]), 0);
    }
}
