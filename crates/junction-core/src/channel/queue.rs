use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::{MessageChannel, PollableChannel};
use crate::error::MessagingResult;
use crate::foundation::Message;

/// A pollable FIFO channel, unbounded unless a capacity is given.
///
/// Senders block (up to their timeout) while a bounded queue is full;
/// receivers block (up to their timeout) while it is empty.
pub struct QueueChannel {
    name: String,
    capacity: Option<usize>,
    queue: Mutex<VecDeque<Message>>,
    not_empty: Notify,
    not_full: Notify,
}

impl QueueChannel {
    /// Creates an unbounded queue channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            queue: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Creates a queue channel holding at most `capacity` messages.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::new(name)
        }
    }

    /// Returns the number of queued messages.
    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns the free capacity, or `None` if unbounded.
    pub fn remaining_capacity(&self) -> Option<usize> {
        let len = self.queue_size();
        self.capacity.map(|c| c.saturating_sub(len))
    }

    /// Removes and returns all queued messages.
    pub fn clear(&self) -> Vec<Message> {
        let drained: Vec<Message> = self.queue.lock().drain(..).collect();
        if !drained.is_empty() {
            self.not_full.notify_waiters();
        }
        drained
    }

    fn try_push(&self, message: Message) -> Result<(), Message> {
        let mut queue = self.queue.lock();
        if self.capacity.is_none_or(|c| queue.len() < c) {
            queue.push_back(message);
            Ok(())
        } else {
            Err(message)
        }
    }

    fn try_pop(&self) -> Option<Message> {
        let popped = self.queue.lock().pop_front();
        if popped.is_some() {
            self.not_full.notify_one();
        }
        popped
    }
}

/// Waits for `notified` until `deadline`; returns `false` on timeout.
async fn wait_until(notified: impl Future<Output = ()>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            notified.await;
            true
        }
        Some(deadline) => tokio::time::timeout_at(deadline, notified).await.is_ok(),
    }
}

#[async_trait]
impl MessageChannel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Option<Duration>) -> MessagingResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = message;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(pending) {
                Ok(()) => {
                    self.not_empty.notify_one();
                    return Ok(true);
                }
                Err(message) => pending = message,
            }

            if !wait_until(notified, deadline).await {
                trace!(channel = %self.name, "Send timed out on full queue");
                return Ok(false);
            }
        }
    }
}

#[async_trait]
impl PollableChannel for QueueChannel {
    async fn receive(&self, timeout: Option<Duration>) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop() {
                return Some(message);
            }

            if !wait_until(notified, deadline).await {
                return self.try_pop();
            }
        }
    }
}

impl std::fmt::Debug for QueueChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueChannel")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("queue_size", &self.queue_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_receive_times_out_with_none() {
        let channel = QueueChannel::new("q");
        let received = channel.receive(Some(Duration::from_millis(20))).await;
        assert!(received.is_none());
    }

    #[test]
    fn test_pending_receive_is_woken_by_send() {
        let channel = QueueChannel::new("q");
        let mut receive = tokio_test::task::spawn(channel.receive(None));
        tokio_test::assert_pending!(receive.poll());

        tokio_test::block_on(channel.send(Message::new("x"), None)).unwrap();
        assert!(receive.is_woken());
        let received = tokio_test::assert_ready!(receive.poll());
        assert_eq!(received.unwrap().payload().as_str(), Some("x"));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let channel = QueueChannel::new("q");
        for i in 0..3 {
            assert!(channel.send(Message::new(i as i64), None).await.unwrap());
        }
        for i in 0..3 {
            let m = channel.receive(Some(Duration::ZERO)).await.unwrap();
            assert_eq!(m.payload().as_value(), Some(&serde_json::json!(i)));
        }
    }

    #[tokio::test]
    async fn test_bounded_send_times_out_when_full() {
        let channel = QueueChannel::bounded("q", 1);
        assert!(channel.send(Message::new("a"), None).await.unwrap());
        let sent = channel
            .send(Message::new("b"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(channel.remaining_capacity(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_receiver_wakes_on_send() {
        let channel = Arc::new(QueueChannel::new("q"));
        let receiver = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.receive(Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.send(Message::new("late"), None).await.unwrap();

        let received = receiver.await.unwrap().unwrap();
        assert_eq!(received.payload().as_str(), Some("late"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_sender_proceeds_after_receive() {
        let channel = Arc::new(QueueChannel::bounded("q", 1));
        channel.send(Message::new("first"), None).await.unwrap();

        let sender = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .send(Message::new("second"), Some(Duration::from_secs(5)))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let first = channel.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(first.payload().as_str(), Some("first"));
        assert!(sender.await.unwrap().unwrap());
        assert_eq!(channel.clear().len(), 1);
    }
}
