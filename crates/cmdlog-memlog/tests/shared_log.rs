//! Several producers and consumers sharing one in-memory log

use std::time::Duration;

use cmdlog_core::{
    Command, CommandAction, CommandId, CommandKind, LogConsumer, LogProducer, ProducerRecord,
    TopicPartition,
};
use cmdlog_memlog::{MemoryLog, MemoryLogConfig};
use tokio_test::assert_ok;

const POLL: Duration = Duration::from_millis(20);

#[tokio::test]
async fn test_keyed_appends_stick_to_one_partition() {
    let log = MemoryLog::with_config(MemoryLogConfig::default().with_default_partitions(4));
    let producer = log.json_producer::<String, u32>();

    let mut partitions = Vec::new();
    for i in 0..10 {
        let record = ProducerRecord {
            topic: "events".to_string(),
            partition: None,
            key: "same-key".to_string(),
            value: Some(i),
        };
        partitions.push(producer.send(record).wait().await.unwrap().partition);
    }

    assert_eq!(log.partition_count("events"), Some(4));
    assert!(partitions.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_independent_consumer_positions() {
    let log = MemoryLog::new();
    let producer = log.json_producer::<String, String>();
    for i in 0..3 {
        producer
            .send(ProducerRecord::to_partition("t", 0, format!("k{i}"), format!("v{i}")))
            .wait()
            .await
            .unwrap();
    }

    let tp = TopicPartition::new("t", 0);
    let fast = log.json_consumer::<String, String>();
    let slow = log.json_consumer::<String, String>();
    fast.assign(std::slice::from_ref(&tp)).unwrap();
    slow.assign(std::slice::from_ref(&tp)).unwrap();

    assert_eq!(fast.poll(POLL).await.unwrap().len(), 3);
    assert!(fast.poll(POLL).await.unwrap().is_empty());

    // The second consumer still starts from the beginning
    let batch = slow.poll(POLL).await.unwrap();
    assert_eq!(batch.last_offset(), Some(2));
}

#[tokio::test]
async fn test_tombstone_round_trips_as_missing_value() {
    let log = MemoryLog::new();
    let producer = log.json_producer::<String, String>();
    producer
        .send(ProducerRecord::tombstone("t", 0, "gone".to_string()))
        .wait()
        .await
        .unwrap();

    let consumer = log.json_consumer::<String, String>();
    consumer.assign(&[TopicPartition::new("t", 0)]).unwrap();
    let batch = consumer.poll(POLL).await.unwrap();
    let record = batch.iter().next().unwrap();
    assert_eq!(record.key, "gone");
    assert!(record.value.is_none());

    let stored = log.entries(&TopicPartition::new("t", 0)).unwrap();
    assert!(stored[0].value.is_none());
    assert!(stored[0].timestamp_millis > 0);
}

#[tokio::test]
async fn test_end_offsets_track_appends_from_any_producer() {
    let log = MemoryLog::new();
    let a = log.json_producer::<String, String>();
    let b = log.json_producer::<String, String>();
    let tp = TopicPartition::new("t", 0);

    a.send(ProducerRecord::to_partition("t", 0, "a".into(), "1".into()))
        .wait()
        .await
        .unwrap();
    b.send(ProducerRecord::to_partition("t", 0, "b".into(), "2".into()))
        .wait()
        .await
        .unwrap();

    let consumer = log.json_consumer::<String, String>();
    let offsets = assert_ok!(consumer.end_offsets(std::slice::from_ref(&tp)).await);
    assert_eq!(offsets.get(&tp), Some(&2));
}

#[tokio::test]
async fn test_postcard_codecs_carry_commands() {
    let log = MemoryLog::new();
    let producer = log.postcard_producer::<CommandId, Command>();
    let id = CommandId::new(CommandKind::Table, "users", CommandAction::Create).unwrap();
    let cmd = Command::new("CREATE TABLE users (id INT) WITH (kafka_topic='users');")
        .with_property("replicas", "3");
    assert_ok!(
        producer
            .send(ProducerRecord::to_partition("commands", 0, id.clone(), cmd.clone()))
            .wait()
            .await
    );

    let consumer = log.postcard_consumer::<CommandId, Command>();
    consumer.assign(&[TopicPartition::new("commands", 0)]).unwrap();
    let batch = consumer.poll(POLL).await.unwrap();
    let record = batch.iter().next().unwrap();
    assert_eq!(record.key, id);
    assert_eq!(record.value.as_ref(), Some(&cmd));

    // Stored bytes are binary, not JSON text
    let stored = log.entries(&TopicPartition::new("commands", 0)).unwrap();
    assert_ne!(stored[0].key.first(), Some(&b'{'));
}
