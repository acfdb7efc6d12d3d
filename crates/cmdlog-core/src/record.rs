//! Log entry types shared by producers and consumers

use std::fmt;

use serde::{Deserialize, Serialize};

/// A (topic, partition) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single entry read from the log
///
/// `value` is `None` for a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord<K, V> {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: K,
    pub value: Option<V>,
}

impl<K, V> ConsumerRecord<K, V> {
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
        key: K,
        value: Option<V>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// The records returned by one poll, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch<K, V> {
    records: Vec<ConsumerRecord<K, V>>,
}

impl<K, V> Default for RecordBatch<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K, V> RecordBatch<K, V> {
    pub fn new(records: Vec<ConsumerRecord<K, V>>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConsumerRecord<K, V>> {
        self.records.iter()
    }

    /// Records belonging to one partition, preserving order
    pub fn records<'a>(
        &'a self,
        partition: &'a TopicPartition,
    ) -> impl Iterator<Item = &'a ConsumerRecord<K, V>> + 'a {
        self.records
            .iter()
            .filter(move |r| r.partition == partition.partition && r.topic == partition.topic)
    }

    /// Highest offset in the batch
    pub fn last_offset(&self) -> Option<u64> {
        self.records.iter().map(|r| r.offset).max()
    }
}

impl<K, V> IntoIterator for RecordBatch<K, V> {
    type Item = ConsumerRecord<K, V>;
    type IntoIter = std::vec::IntoIter<ConsumerRecord<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a, K, V> IntoIterator for &'a RecordBatch<K, V> {
    type Item = &'a ConsumerRecord<K, V>;
    type IntoIter = std::slice::Iter<'a, ConsumerRecord<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl<K, V> FromIterator<ConsumerRecord<K, V>> for RecordBatch<K, V> {
    fn from_iter<T: IntoIterator<Item = ConsumerRecord<K, V>>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A keyed record to append
///
/// When `partition` is `None` the log service picks one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord<K, V> {
    pub topic: String,
    pub partition: Option<u32>,
    pub key: K,
    pub value: Option<V>,
}

impl<K, V> ProducerRecord<K, V> {
    /// Record bound to an explicit partition
    pub fn to_partition(topic: impl Into<String>, partition: u32, key: K, value: V) -> Self {
        Self {
            topic: topic.into(),
            partition: Some(partition),
            key,
            value: Some(value),
        }
    }

    /// Tombstone for `key` on an explicit partition
    pub fn tombstone(topic: impl Into<String>, partition: u32, key: K) -> Self {
        Self {
            topic: topic.into(),
            partition: Some(partition),
            key,
            value: None,
        }
    }
}

/// Acknowledged position of an appended record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

impl RecordMetadata {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
