//! The shared in-memory log
//!
//! A [`MemoryLog`] is a cheap, cloneable handle; every producer and consumer
//! created from it sees the same topics.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tracing::{debug, info, trace};

use cmdlog_core::{
    AckError, AckSender, AppendCause, Codec, Command, CommandId, JsonCodec, PostcardCodec,
    RecordMetadata, TopicPartition,
};

use crate::config::MemoryLogConfig;
use crate::consumer::MemoryConsumer;
use crate::producer::MemoryProducer;

/// An entry as held by the log, still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: Bytes,
    /// `None` for a tombstone
    pub value: Option<Bytes>,
    /// Wall-clock time the entry was appended
    pub timestamp_millis: i64,
}

#[derive(Default)]
struct PartitionLog {
    entries: RwLock<Vec<StoredEntry>>,
}

#[derive(Default)]
struct FaultState {
    /// Causes handed to the next appends, one each
    failures: VecDeque<AppendCause>,
    /// While set, appends land but their acknowledgments are parked
    hold_acks: bool,
    held: Vec<(AckSender, RecordMetadata)>,
}

struct LogInner {
    config: MemoryLogConfig,
    topics: DashMap<String, Arc<Vec<PartitionLog>>>,
    /// Signalled after every successful append
    appended: Notify,
    faults: Mutex<FaultState>,
}

/// In-memory partitioned log service
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<LogInner>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    /// Create an empty log with default settings
    pub fn new() -> Self {
        Self::with_config(MemoryLogConfig::default())
    }

    /// Create an empty log with a custom configuration
    pub fn with_config(config: MemoryLogConfig) -> Self {
        Self {
            inner: Arc::new(LogInner {
                config,
                topics: DashMap::new(),
                appended: Notify::new(),
                faults: Mutex::new(FaultState::default()),
            }),
        }
    }

    pub fn config(&self) -> &MemoryLogConfig {
        &self.inner.config
    }

    /// Create a topic with a fixed partition count
    ///
    /// Returns `false` and leaves the topic untouched if it already exists.
    pub fn create_topic(&self, name: impl Into<String>, partitions: u32) -> bool {
        let name = name.into();
        let mut created = false;
        self.inner.topics.entry(name.clone()).or_insert_with(|| {
            created = true;
            Arc::new(new_partitions(partitions.max(1)))
        });
        if created {
            info!(topic = %name, partitions = partitions.max(1), "Created topic");
        }
        created
    }

    /// Number of partitions of a topic, if it exists
    pub fn partition_count(&self, topic: &str) -> Option<u32> {
        self.inner.topics.get(topic).map(|p| p.len() as u32)
    }

    /// End offset of a partition, if it exists
    pub fn end_offset(&self, partition: &TopicPartition) -> Option<u64> {
        self.partition(partition)
            .map(|(parts, idx)| parts[idx].entries.read().len() as u64)
    }

    /// Snapshot of every stored entry of a partition
    pub fn entries(&self, partition: &TopicPartition) -> Option<Vec<StoredEntry>> {
        self.partition(partition)
            .map(|(parts, idx)| parts[idx].entries.read().clone())
    }

    /// Make the next append fail with `cause`
    ///
    /// Calls queue up; each failing append consumes one cause.
    pub fn fail_next_append(&self, cause: AppendCause) {
        self.inner.faults.lock().failures.push_back(cause);
    }

    /// Park acknowledgments of subsequent appends until [`release_acks`](Self::release_acks)
    pub fn hold_acks(&self) {
        self.inner.faults.lock().hold_acks = true;
    }

    /// Deliver every parked acknowledgment and stop parking new ones
    ///
    /// Returns how many acknowledgments were released.
    pub fn release_acks(&self) -> usize {
        let held = {
            let mut faults = self.inner.faults.lock();
            faults.hold_acks = false;
            std::mem::take(&mut faults.held)
        };
        let released = held.len();
        for (sender, metadata) in held {
            sender.complete(Ok(metadata));
        }
        debug!(released, "Released held acknowledgments");
        released
    }

    /// Drop every parked acknowledgment; waiters observe an interrupted wait
    pub fn abandon_held_acks(&self) -> usize {
        let held = std::mem::take(&mut self.inner.faults.lock().held);
        held.len()
    }

    /// Create a producer using the given codecs
    pub fn producer<K, V>(
        &self,
        key_codec: impl Codec<K> + 'static,
        value_codec: impl Codec<V> + 'static,
    ) -> MemoryProducer<K, V> {
        MemoryProducer::new(self.clone(), Arc::new(key_codec), Arc::new(value_codec))
    }

    /// Create a consumer using the given codecs
    pub fn consumer<K, V>(
        &self,
        key_codec: impl Codec<K> + 'static,
        value_codec: impl Codec<V> + 'static,
    ) -> MemoryConsumer<K, V> {
        MemoryConsumer::new(self.clone(), Arc::new(key_codec), Arc::new(value_codec))
    }

    /// Create a producer that stores keys and values as JSON
    pub fn json_producer<K, V>(&self) -> MemoryProducer<K, V>
    where
        K: Serialize + DeserializeOwned + 'static,
        V: Serialize + DeserializeOwned + 'static,
    {
        self.producer(JsonCodec::<K>::new(), JsonCodec::<V>::new())
    }

    /// Create a consumer that reads JSON keys and values
    pub fn json_consumer<K, V>(&self) -> MemoryConsumer<K, V>
    where
        K: Serialize + DeserializeOwned + 'static,
        V: Serialize + DeserializeOwned + 'static,
    {
        self.consumer(JsonCodec::<K>::new(), JsonCodec::<V>::new())
    }

    /// Create a producer that stores keys and values in postcard's binary form
    pub fn postcard_producer<K, V>(&self) -> MemoryProducer<K, V>
    where
        K: Serialize + DeserializeOwned + 'static,
        V: Serialize + DeserializeOwned + 'static,
    {
        self.producer(PostcardCodec::<K>::new(), PostcardCodec::<V>::new())
    }

    /// Create a consumer that reads postcard keys and values
    pub fn postcard_consumer<K, V>(&self) -> MemoryConsumer<K, V>
    where
        K: Serialize + DeserializeOwned + 'static,
        V: Serialize + DeserializeOwned + 'static,
    {
        self.consumer(PostcardCodec::<K>::new(), PostcardCodec::<V>::new())
    }

    /// Producer for the command log, JSON-encoded
    pub fn command_producer(&self) -> MemoryProducer<CommandId, Command> {
        self.json_producer()
    }

    /// Consumer for the command log, JSON-encoded
    pub fn command_consumer(&self) -> MemoryConsumer<CommandId, Command> {
        self.json_consumer()
    }

    /// Append an encoded entry
    ///
    /// Unknown topics are created with the configured default partition
    /// count. An explicit partition outside the topic fails.
    pub(crate) fn append(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: Bytes,
        value: Option<Bytes>,
    ) -> Result<RecordMetadata, AppendCause> {
        if let Some(cause) = self.inner.faults.lock().failures.pop_front() {
            debug!(topic, kind = %cause.kind, "Injected append failure");
            return Err(cause);
        }

        let partitions = self.topic_or_create(topic);
        let count = partitions.len() as u32;
        let index = match partition {
            Some(p) if p < count => p,
            Some(p) => {
                return Err(AppendCause::other(
                    "UnknownTopicOrPartition",
                    format!("This server does not host this topic-partition: {topic}-{p}"),
                ));
            }
            None => partition_for_key(&key, count),
        };

        let offset = {
            let mut entries = partitions[index as usize].entries.write();
            entries.push(StoredEntry {
                key,
                value,
                timestamp_millis: chrono::Utc::now().timestamp_millis(),
            });
            entries.len() as u64 - 1
        };

        trace!(topic, partition = index, offset, "Appended entry");
        self.inner.appended.notify_waiters();

        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition: index,
            offset,
        })
    }

    /// Resolve an acknowledgment, or park it while acks are held
    pub(crate) fn acknowledge(&self, sender: AckSender, result: Result<RecordMetadata, AckError>) {
        match result {
            Ok(metadata) => {
                let mut faults = self.inner.faults.lock();
                if faults.hold_acks {
                    faults.held.push((sender, metadata));
                    return;
                }
                drop(faults);
                sender.complete(Ok(metadata));
            }
            Err(e) => sender.complete(Err(e)),
        }
    }

    /// Entries of a partition starting at `from`, at most `max`
    ///
    /// `None` if the partition does not exist.
    pub(crate) fn read(
        &self,
        partition: &TopicPartition,
        from: u64,
        max: usize,
    ) -> Option<Vec<StoredEntry>> {
        self.partition(partition).map(|(parts, idx)| {
            let entries = parts[idx].entries.read();
            let start = (from as usize).min(entries.len());
            let end = start.saturating_add(max).min(entries.len());
            entries[start..end].to_vec()
        })
    }

    /// Register interest in the next append
    pub(crate) fn appended(&self) -> &Notify {
        &self.inner.appended
    }

    fn partition(&self, tp: &TopicPartition) -> Option<(Arc<Vec<PartitionLog>>, usize)> {
        let parts = self.inner.topics.get(&tp.topic)?.value().clone();
        let idx = tp.partition as usize;
        if idx < parts.len() {
            Some((parts, idx))
        } else {
            None
        }
    }

    fn topic_or_create(&self, topic: &str) -> Arc<Vec<PartitionLog>> {
        if let Some(parts) = self.inner.topics.get(topic) {
            return parts.value().clone();
        }
        self.create_topic(topic, self.inner.config.default_partitions);
        self.inner
            .topics
            .get(topic)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| Arc::new(new_partitions(1)))
    }
}

fn new_partitions(count: u32) -> Vec<PartitionLog> {
    (0..count).map(|_| PartitionLog::default()).collect()
}

fn partition_for_key(key: &[u8], count: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % count as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_topic_once() {
        let log = MemoryLog::new();
        assert!(log.create_topic("commands", 3));
        assert!(!log.create_topic("commands", 5));
        assert_eq!(log.partition_count("commands"), Some(3));
    }

    #[test]
    fn test_append_assigns_sequential_offsets() {
        let log = MemoryLog::new();
        for expected in 0..5u64 {
            let meta = log
                .append("commands", Some(0), Bytes::from("k"), Some(Bytes::from("v")))
                .unwrap();
            assert_eq!(meta.offset, expected);
            assert_eq!(meta.partition, 0);
        }
        assert_eq!(log.end_offset(&TopicPartition::new("commands", 0)), Some(5));
    }

    #[test]
    fn test_append_creates_topic_with_default_partitions() {
        let log = MemoryLog::with_config(MemoryLogConfig::default().with_default_partitions(4));
        log.append("fresh", None, Bytes::from("key"), None).unwrap();
        assert_eq!(log.partition_count("fresh"), Some(4));
    }

    #[test]
    fn test_append_to_missing_partition_fails() {
        let log = MemoryLog::new();
        log.create_topic("commands", 1);
        let err = log
            .append("commands", Some(3), Bytes::from("k"), None)
            .unwrap_err();
        assert!(!err.is_runtime());
        assert_eq!(err.kind, "UnknownTopicOrPartition");
        assert!(err.to_string().starts_with("UnknownTopicOrPartition: "));
    }

    #[test]
    fn test_injected_failures_are_consumed_in_order() {
        let log = MemoryLog::new();
        log.fail_next_append(AppendCause::runtime("A", "first"));
        log.fail_next_append(AppendCause::other("B", "second"));

        let first = log.append("t", Some(0), Bytes::new(), None).unwrap_err();
        let second = log.append("t", Some(0), Bytes::new(), None).unwrap_err();
        assert_eq!(first.message, "first");
        assert_eq!(second.message, "second");
        assert!(log.append("t", Some(0), Bytes::new(), None).is_ok());
    }

    #[test]
    fn test_read_window() {
        let log = MemoryLog::new();
        for i in 0..10u8 {
            log.append("t", Some(0), Bytes::from(vec![i]), Some(Bytes::new()))
                .unwrap();
        }
        let tp = TopicPartition::new("t", 0);
        let window = log.read(&tp, 3, 4).unwrap();
        let keys: Vec<u8> = window.iter().map(|e| e.key[0]).collect();
        assert_eq!(keys, vec![3, 4, 5, 6]);

        assert!(log.read(&tp, 42, 4).unwrap().is_empty());
        assert!(log.read(&TopicPartition::new("t", 9), 0, 4).is_none());
    }

    #[test]
    fn test_keyed_partitioning_is_stable() {
        let log = MemoryLog::new();
        log.create_topic("t", 8);
        let a = log.append("t", None, Bytes::from("same"), None).unwrap();
        let b = log.append("t", None, Bytes::from("same"), None).unwrap();
        assert_eq!(a.partition, b.partition);
    }
}
