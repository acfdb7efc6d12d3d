//! Producer handle over a [`MemoryLog`]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use cmdlog_core::{AckError, AppendCause, Codec, LogProducer, PendingAppend, ProducerRecord};

use crate::log::MemoryLog;

/// Appends typed records to a [`MemoryLog`]
pub struct MemoryProducer<K, V> {
    log: MemoryLog,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    closed: AtomicBool,
}

impl<K, V> MemoryProducer<K, V> {
    pub(crate) fn new(
        log: MemoryLog,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self {
            log,
            key_codec,
            value_codec,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K, V> LogProducer<K, V> for MemoryProducer<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn send(&self, record: ProducerRecord<K, V>) -> PendingAppend {
        if self.is_closed() {
            return PendingAppend::ready(Err(AckError::Failed(AppendCause::runtime(
                "IllegalState",
                "Cannot perform operation after producer has been closed",
            ))));
        }

        let key = match self.key_codec.encode(&record.key) {
            Ok(bytes) => bytes,
            Err(e) => {
                return PendingAppend::ready(Err(AckError::Failed(AppendCause::runtime(
                    "Serialization",
                    format!("Can't serialize key of record to topic {}: {e}", record.topic),
                ))));
            }
        };
        let value = match record.value.as_ref().map(|v| self.value_codec.encode(v)).transpose() {
            Ok(bytes) => bytes,
            Err(e) => {
                return PendingAppend::ready(Err(AckError::Failed(AppendCause::runtime(
                    "Serialization",
                    format!("Can't serialize value of record to topic {}: {e}", record.topic),
                ))));
            }
        };

        let (sender, pending) = PendingAppend::channel();
        match self.log.append(&record.topic, record.partition, key, value) {
            Ok(metadata) => {
                debug!(
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    "Record appended"
                );
                self.log.acknowledge(sender, Ok(metadata));
            }
            Err(cause) => sender.complete(Err(AckError::Failed(cause))),
        }
        pending
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Memory producer closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdlog_core::TopicPartition;

    #[tokio::test]
    async fn test_send_acknowledges_offset() {
        let log = MemoryLog::new();
        let producer = log.json_producer::<String, String>();

        let first = producer
            .send(ProducerRecord::to_partition("t", 0, "a".into(), "1".into()))
            .wait()
            .await
            .unwrap();
        let second = producer
            .send(ProducerRecord::to_partition("t", 0, "b".into(), "2".into()))
            .wait()
            .await
            .unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(log.end_offset(&TopicPartition::new("t", 0)), Some(2));
    }

    #[tokio::test]
    async fn test_tombstone_is_stored_without_value() {
        let log = MemoryLog::new();
        let producer = log.json_producer::<String, String>();

        producer
            .send(ProducerRecord::tombstone("t", 0, "gone".into()))
            .wait()
            .await
            .unwrap();

        let entries = log.entries(&TopicPartition::new("t", 0)).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].value.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let log = MemoryLog::new();
        let producer = log.json_producer::<String, String>();
        producer.close().await;

        let result = producer
            .send(ProducerRecord::to_partition("t", 0, "a".into(), "1".into()))
            .wait()
            .await;
        assert!(matches!(result, Err(AckError::Failed(cause)) if cause.is_runtime()));
        assert_eq!(log.end_offset(&TopicPartition::new("t", 0)), None);
    }

    #[tokio::test]
    async fn test_held_acks_complete_on_release() {
        let log = MemoryLog::new();
        let producer = log.json_producer::<String, String>();
        log.hold_acks();

        let pending = producer.send(ProducerRecord::to_partition("t", 0, "a".into(), "1".into()));
        let waiter = tokio::spawn(pending.wait());

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        // The entry is already durable even though the ack is parked
        assert_eq!(log.end_offset(&TopicPartition::new("t", 0)), Some(1));

        assert_eq!(log.release_acks(), 1);
        assert_eq!(waiter.await.unwrap().unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_abandoned_ack_is_interrupted() {
        let log = MemoryLog::new();
        let producer = log.json_producer::<String, String>();
        log.hold_acks();

        let pending = producer.send(ProducerRecord::to_partition("t", 0, "a".into(), "1".into()));
        assert_eq!(log.abandon_held_acks(), 1);
        assert!(matches!(pending.wait().await, Err(AckError::Interrupted(_))));
    }
}
