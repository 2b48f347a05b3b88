//! Release strategies decide when a group is complete.

use std::sync::Arc;

use crate::group::MessageGroup;

/// Decides whether a group is ready to be released.
pub trait ReleaseStrategy: Send + Sync {
    /// Returns `true` if `group` can be released now.
    fn can_release(&self, group: &MessageGroup) -> bool;
}

/// Releases once the group holds as many messages as the first message's
/// sequence size.
///
/// A group whose first message carries no sequence size (or size 0) is
/// never released by this strategy; expiry or a group timeout must handle it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceSizeReleaseStrategy;

impl ReleaseStrategy for SequenceSizeReleaseStrategy {
    fn can_release(&self, group: &MessageGroup) -> bool {
        match group.sequence_size() {
            Some(size) if size > 0 => group.size() as u64 >= size,
            _ => false,
        }
    }
}

/// Releases once the group holds at least `threshold` messages.
#[derive(Debug, Clone, Copy)]
pub struct MessageCountReleaseStrategy {
    threshold: usize,
}

impl MessageCountReleaseStrategy {
    /// Releases at `threshold` messages (minimum 1).
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }
}

impl ReleaseStrategy for MessageCountReleaseStrategy {
    fn can_release(&self, group: &MessageGroup) -> bool {
        group.size() >= self.threshold
    }
}

/// Releases according to a closure.
pub struct FnReleaseStrategy {
    f: Arc<dyn Fn(&MessageGroup) -> bool + Send + Sync>,
}

impl FnReleaseStrategy {
    /// Wraps `f`.
    pub fn new(f: impl Fn(&MessageGroup) -> bool + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl ReleaseStrategy for FnReleaseStrategy {
    fn can_release(&self, group: &MessageGroup) -> bool {
        (self.f)(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::{Message, MessageBuilder};

    fn group_of(messages: Vec<Message>) -> MessageGroup {
        let mut group = MessageGroup::new("k".into());
        for m in messages {
            group.add(m);
        }
        group
    }

    #[test]
    fn test_sequence_size_release() {
        let strategy = SequenceSizeReleaseStrategy;
        let first = MessageBuilder::with_payload("a").sequence(1, 2).build();
        let second = MessageBuilder::with_payload("b").sequence(2, 2).build();

        assert!(!strategy.can_release(&group_of(vec![first.clone()])));
        assert!(strategy.can_release(&group_of(vec![first, second])));
    }

    #[test]
    fn test_sequence_size_never_releases_without_size() {
        let strategy = SequenceSizeReleaseStrategy;
        assert!(!strategy.can_release(&group_of(vec![Message::new("a"), Message::new("b")])));
        assert!(!strategy.can_release(&group_of(vec![])));
    }

    #[test]
    fn test_count_and_fn_release() {
        let group = group_of(vec![Message::new("a"), Message::new("b")]);
        assert!(MessageCountReleaseStrategy::new(2).can_release(&group));
        assert!(!MessageCountReleaseStrategy::new(3).can_release(&group));
        assert!(FnReleaseStrategy::new(|g| g.size() % 2 == 0).can_release(&group));
    }
}
