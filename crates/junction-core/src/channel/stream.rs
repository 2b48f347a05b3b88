use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

use super::{MessageChannel, StreamableChannel};
use crate::error::{MessagingError, MessagingResult};
use crate::foundation::Message;

/// Default number of messages buffered per stream before slow consumers lag.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// A channel whose consumers read messages as streams.
///
/// Each stream sees every message sent after it was opened. A stream that
/// falls more than the channel capacity behind skips the missed messages and
/// logs a warning.
pub struct StreamChannel {
    name: String,
    sender: broadcast::Sender<Message>,
}

impl StreamChannel {
    /// Creates a stream channel with [`DEFAULT_STREAM_CAPACITY`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_STREAM_CAPACITY)
    }

    /// Creates a stream channel with the given per-stream buffer.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
        }
    }

    /// Returns the number of open streams.
    pub fn stream_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl MessageChannel for StreamChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, _timeout: Option<Duration>) -> MessagingResult<bool> {
        self.sender
            .send(message)
            .map(|_| true)
            .map_err(|broadcast::error::SendError(message)| {
                MessagingError::dispatch(message, "stream channel has no open streams")
            })
    }
}

impl StreamableChannel for StreamChannel {
    fn subscribe_stream(&self) -> BoxStream<'static, Message> {
        let name = self.name.clone();
        let receiver = self.sender.subscribe();
        stream::unfold(receiver, move |mut receiver| {
            let name = name.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((message, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %name, skipped, "Stream consumer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("name", &self.name)
            .field("streams", &self.stream_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_stream_sees_messages_sent_after_opening() {
        let channel = StreamChannel::new("events");
        let mut first = channel.subscribe_stream();
        let mut second = channel.subscribe_stream();
        assert_eq!(channel.stream_count(), 2);

        channel.send(Message::new("one"), None).await.unwrap();

        assert_eq!(first.next().await.unwrap().payload().as_str(), Some("one"));
        assert_eq!(second.next().await.unwrap().payload().as_str(), Some("one"));
    }

    #[tokio::test]
    async fn test_send_without_streams_fails() {
        let channel = StreamChannel::new("events");
        let err = channel.send(Message::new("lost"), None).await.unwrap_err();
        assert!(matches!(err, MessagingError::Dispatch { .. }));
    }

    #[tokio::test]
    async fn test_lagging_stream_skips_to_retained_messages() {
        let channel = StreamChannel::with_capacity("events", 2);
        let mut stream = channel.subscribe_stream();
        for i in 0..4_i64 {
            channel.send(Message::new(i), None).await.unwrap();
        }
        let next = stream.next().await.unwrap();
        assert_eq!(next.payload().as_value(), Some(&serde_json::json!(2)));
    }
}
