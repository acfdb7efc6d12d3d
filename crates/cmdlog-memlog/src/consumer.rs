//! Consumer handle over a [`MemoryLog`]
//!
//! Mirrors a statically assigned log consumer: it tracks its own position
//! per assigned partition, polls block until data arrives or the timeout
//! elapses, and [`wakeup`](LogConsumer::wakeup) aborts the blocking call in
//! progress or, if none is, the next one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use cmdlog_core::{Codec, ConsumerRecord, LogConsumer, LogError, RecordBatch, TopicPartition};

use crate::log::MemoryLog;

/// Reads typed records from assigned partitions of a [`MemoryLog`]
pub struct MemoryConsumer<K, V> {
    log: MemoryLog,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    /// Next offset to read, per assigned partition
    positions: Mutex<BTreeMap<TopicPartition, u64>>,
    woken: AtomicBool,
    wake: Notify,
    closed: AtomicBool,
}

impl<K, V> MemoryConsumer<K, V> {
    pub(crate) fn new(
        log: MemoryLog,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self {
            log,
            key_codec,
            value_codec,
            positions: Mutex::new(BTreeMap::new()),
            woken: AtomicBool::new(false),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Currently assigned partitions
    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.positions.lock().keys().cloned().collect()
    }

    /// Next offset this consumer will read from a partition
    pub fn position(&self, partition: &TopicPartition) -> Option<u64> {
        self.positions.lock().get(partition).copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        if self.woken.swap(false, Ordering::SeqCst) {
            return Err(LogError::Wakeup);
        }
        Ok(())
    }

    /// Decode whatever is available past the current positions and advance them
    fn fetch(&self) -> Result<RecordBatch<K, V>, LogError> {
        let max = self.log.config().max_poll_records;
        let mut positions = self.positions.lock();
        let mut records = Vec::new();
        let mut advanced = Vec::new();

        for (tp, &position) in positions.iter() {
            let remaining = max.saturating_sub(records.len());
            if remaining == 0 {
                break;
            }
            let entries = match self.log.read(tp, position, remaining) {
                Some(entries) => entries,
                // Nothing has been written to the topic yet
                None if self.log.partition_count(&tp.topic).is_none() => Vec::new(),
                None => return Err(LogError::UnknownPartition(tp.clone())),
            };

            for (i, entry) in entries.iter().enumerate() {
                let key = self.key_codec.decode(&entry.key)?;
                let value = entry
                    .value
                    .as_ref()
                    .map(|v| self.value_codec.decode(v))
                    .transpose()?;
                records.push(ConsumerRecord::new(
                    tp.topic.clone(),
                    tp.partition,
                    position + i as u64,
                    key,
                    value,
                ));
            }
            if !entries.is_empty() {
                advanced.push((tp.clone(), position + entries.len() as u64));
            }
        }

        for (tp, next) in advanced {
            positions.insert(tp, next);
        }
        Ok(RecordBatch::new(records))
    }
}

#[async_trait]
impl<K, V> LogConsumer<K, V> for MemoryConsumer<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn assign(&self, partitions: &[TopicPartition]) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        let mut positions = self.positions.lock();
        let previous = std::mem::take(&mut *positions);
        for tp in partitions {
            let start = previous.get(tp).copied().unwrap_or(0);
            positions.insert(tp.clone(), start);
        }
        debug!(partitions = ?partitions, "Consumer assigned");
        Ok(())
    }

    fn seek_to_beginning(&self, partitions: &[TopicPartition]) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        let mut positions = self.positions.lock();
        for tp in partitions {
            match positions.get_mut(tp) {
                Some(position) => *position = 0,
                None => return Err(LogError::NotAssigned(tp.clone())),
            }
        }
        trace!(partitions = ?partitions, "Seeked to beginning");
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<RecordBatch<K, V>, LogError> {
        self.ensure_usable()?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking so an append racing with the check is not missed
            let appended = self.log.appended().notified();
            let woken = self.wake.notified();

            let batch = self.fetch()?;
            if !batch.is_empty() {
                trace!(records = batch.len(), "Poll returned records");
                return Ok(batch);
            }
            self.ensure_usable()?;

            if Instant::now() >= deadline {
                return Ok(batch);
            }

            tokio::select! {
                _ = appended => {}
                _ = woken => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    async fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, u64>, LogError> {
        self.ensure_usable()?;
        partitions
            .iter()
            .map(|tp| {
                self.log
                    .end_offset(tp)
                    .map(|offset| (tp.clone(), offset))
                    .ok_or_else(|| LogError::UnknownPartition(tp.clone()))
            })
            .collect()
    }

    fn wakeup(&self) {
        self.woken.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.wake.notify_waiters();
            debug!("Memory consumer closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdlog_core::{LogProducer, ProducerRecord};

    fn tp() -> TopicPartition {
        TopicPartition::new("t", 0)
    }

    async fn append(log: &MemoryLog, key: &str, value: Option<&str>) {
        let producer = log.json_producer::<String, String>();
        let record = match value {
            Some(v) => ProducerRecord::to_partition("t", 0, key.to_string(), v.to_string()),
            None => ProducerRecord::tombstone("t", 0, key.to_string()),
        };
        producer.send(record).wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_returns_records_in_offset_order() {
        let log = MemoryLog::new();
        append(&log, "a", Some("1")).await;
        append(&log, "b", None).await;
        append(&log, "c", Some("3")).await;

        let consumer = log.json_consumer::<String, String>();
        consumer.assign(&[tp()]).unwrap();

        let batch = consumer.poll(Duration::from_millis(10)).await.unwrap();
        let seen: Vec<_> = batch
            .iter()
            .map(|r| (r.offset, r.key.as_str(), r.value.as_deref()))
            .collect();
        assert_eq!(seen, vec![(0, "a", Some("1")), (1, "b", None), (2, "c", Some("3"))]);
        assert_eq!(consumer.position(&tp()), Some(3));

        let empty = consumer.poll(Duration::from_millis(10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_poll_respects_max_records() {
        let config = crate::MemoryLogConfig::default().with_max_poll_records(2);
        let log = MemoryLog::with_config(config);
        for key in ["a", "b", "c"] {
            append(&log, key, Some("v")).await;
        }

        let consumer = log.json_consumer::<String, String>();
        consumer.assign(&[tp()]).unwrap();
        assert_eq!(consumer.poll(Duration::from_millis(10)).await.unwrap().len(), 2);
        assert_eq!(consumer.poll(Duration::from_millis(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let log = MemoryLog::new();
        log.create_topic("t", 1);
        let consumer = Arc::new(log.json_consumer::<String, String>());
        consumer.assign(&[tp()]).unwrap();

        let poller = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.poll(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        append(&log, "late", Some("v")).await;

        let batch = tokio::time::timeout(Duration::from_secs(5), poller)
            .await
            .expect("poll should wake on append")
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_wakeup_aborts_blocked_poll() {
        let log = MemoryLog::new();
        log.create_topic("t", 1);
        let consumer = Arc::new(log.json_consumer::<String, String>());
        consumer.assign(&[tp()]).unwrap();

        let poller = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.poll(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        consumer.wakeup();

        let result = tokio::time::timeout(Duration::from_secs(5), poller)
            .await
            .expect("wakeup should unblock the poll")
            .unwrap();
        assert_eq!(result, Err(LogError::Wakeup));

        // The wakeup is consumed; the next poll behaves normally
        assert!(consumer.poll(Duration::from_millis(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wakeup_before_poll_is_remembered() {
        let log = MemoryLog::new();
        let consumer = log.json_consumer::<String, String>();
        consumer.assign(&[tp()]).unwrap();

        consumer.wakeup();
        assert_eq!(
            consumer.poll(Duration::from_secs(30)).await,
            Err(LogError::Wakeup)
        );
    }

    #[tokio::test]
    async fn test_seek_requires_assignment() {
        let log = MemoryLog::new();
        let consumer = log.json_consumer::<String, String>();
        assert_eq!(
            consumer.seek_to_beginning(&[tp()]),
            Err(LogError::NotAssigned(tp()))
        );
    }

    #[tokio::test]
    async fn test_seek_rewinds() {
        let log = MemoryLog::new();
        append(&log, "a", Some("1")).await;
        let consumer = log.json_consumer::<String, String>();
        consumer.assign(&[tp()]).unwrap();

        assert_eq!(consumer.poll(Duration::from_millis(5)).await.unwrap().len(), 1);
        consumer.seek_to_beginning(&[tp()]).unwrap();
        assert_eq!(consumer.position(&tp()), Some(0));
        assert_eq!(consumer.poll(Duration::from_millis(5)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_offsets() {
        let log = MemoryLog::new();
        append(&log, "a", Some("1")).await;
        append(&log, "b", Some("2")).await;
        let consumer = log.json_consumer::<String, String>();

        let offsets = consumer.end_offsets(&[tp()]).await.unwrap();
        assert_eq!(offsets.get(&tp()), Some(&2));

        let missing = TopicPartition::new("nope", 0);
        assert_eq!(
            consumer.end_offsets(&[missing.clone()]).await,
            Err(LogError::UnknownPartition(missing))
        );
    }

    #[tokio::test]
    async fn test_closed_consumer_rejects_calls() {
        let log = MemoryLog::new();
        let consumer = log.json_consumer::<String, String>();
        consumer.close().await;
        assert_eq!(consumer.assign(&[tp()]), Err(LogError::Closed));
        assert_eq!(
            consumer.poll(Duration::from_millis(1)).await,
            Err(LogError::Closed)
        );
    }
}
