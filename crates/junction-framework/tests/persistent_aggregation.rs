//! Aggregation over a file-backed store survives a restart.

use std::sync::Arc;
use std::time::Duration;

use junction_core::{Message, MessageBuilder, MessageHandler, Payload, PollableChannel, QueueChannel};
use junction_framework::{
    AggregatingMessageHandler, FileBackend, MessageGroupStore, PersistentMessageGroupStore,
    SharedStore,
};

fn part(number: u64, payload: Payload) -> Message {
    MessageBuilder::with_payload(payload)
        .correlation_id("order-7")
        .sequence(number, 3)
        .build()
}

async fn file_store(dir: &std::path::Path) -> SharedStore {
    let backend = FileBackend::open(dir).await.unwrap();
    Arc::new(PersistentMessageGroupStore::new(backend))
}

#[tokio::test]
async fn test_group_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let nested = Message::new("inner");

    {
        let aggregator = AggregatingMessageHandler::builder()
            .with_store(file_store(dir.path()).await)
            .with_output_channel(Arc::new(QueueChannel::new("unused")))
            .build();
        aggregator.handle_message(part(1, Payload::from("a"))).await.unwrap();
        aggregator
            .handle_message(part(2, Payload::Message(Box::new(nested.clone()))))
            .await
            .unwrap();
    }

    let output = Arc::new(QueueChannel::new("out"));
    let store = file_store(dir.path()).await;
    assert_eq!(store.message_count_for_all_groups().await.unwrap(), 2);

    let aggregator = AggregatingMessageHandler::builder()
        .with_store(store.clone())
        .with_output_channel(output.clone())
        .with_expire_groups_upon_completion(true)
        .build();
    aggregator.handle_message(part(3, Payload::from(3_i64))).await.unwrap();

    let aggregate = output.receive(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(
        aggregate.payload(),
        &Payload::Collection(vec![
            Payload::from("a"),
            Payload::Message(Box::new(nested)),
            Payload::from(3_i64),
        ])
    );
    assert_eq!(aggregate.headers().correlation_id(), Some(&serde_json::json!("order-7")));
    assert_eq!(store.message_group_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_expired_partial_group_is_released_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let output = Arc::new(QueueChannel::new("out"));
    let store = file_store(dir.path()).await;
    let aggregator = AggregatingMessageHandler::builder()
        .with_store(store.clone())
        .with_output_channel(output.clone())
        .with_send_partial_result_on_expiry(true)
        .build();

    aggregator.handle_message(part(1, Payload::from("a"))).await.unwrap();
    assert_eq!(store.expire_message_groups(Duration::ZERO).await.unwrap(), 1);

    let partial = output.receive(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(partial.payload(), &Payload::Collection(vec![Payload::from("a")]));
    assert_eq!(store.message_group_count().await.unwrap(), 0);
}
