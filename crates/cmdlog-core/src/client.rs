//! Log client boundary
//!
//! The command channel consumes an external, partitioned, at-least-once log
//! through these two traits. Implementations own serialization of keys and
//! values; callers only ever see typed records.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::LogError;
use crate::record::{ProducerRecord, RecordBatch, RecordMetadata, TopicPartition};

/// How the cause of a failed append should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CauseClass {
    /// Actionable by the caller; reported with its message verbatim
    Runtime,
    /// Anything else; reported as `"<kind>: <message>"`
    Other,
}

/// The underlying reason an append was not acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCause {
    /// Name of the failure kind, e.g. `UnknownTopicOrPartition`
    pub kind: String,
    pub message: String,
    pub class: CauseClass,
}

impl AppendCause {
    pub fn runtime(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            class: CauseClass::Runtime,
        }
    }

    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            class: CauseClass::Other,
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.class == CauseClass::Runtime
    }
}

impl fmt::Display for AppendCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            CauseClass::Runtime => f.write_str(&self.message),
            CauseClass::Other => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for AppendCause {}

/// Why waiting on a [`PendingAppend`] did not yield metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    /// The log service rejected the append
    Failed(AppendCause),
    /// The wait itself was cancelled before an outcome was known
    Interrupted(String),
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckError::Failed(cause) => cause.fmt(f),
            AckError::Interrupted(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for AckError {}

type AckResult = Result<RecordMetadata, AckError>;

/// Completion side of a [`PendingAppend`], held by the log client
#[derive(Debug)]
pub struct AckSender {
    tx: oneshot::Sender<AckResult>,
}

impl AckSender {
    /// Resolve the pending append; a no-op if nobody is waiting anymore
    pub fn complete(self, result: AckResult) {
        let _ = self.tx.send(result);
    }
}

/// An issued append whose acknowledgment has not been observed yet
#[derive(Debug)]
pub struct PendingAppend {
    rx: oneshot::Receiver<AckResult>,
}

impl PendingAppend {
    /// Create a linked sender/pending pair
    pub fn channel() -> (AckSender, PendingAppend) {
        let (tx, rx) = oneshot::channel();
        (AckSender { tx }, PendingAppend { rx })
    }

    /// A pending append that already has its outcome
    pub fn ready(result: AckResult) -> Self {
        let (tx, pending) = Self::channel();
        tx.complete(result);
        pending
    }

    /// Wait for the log service to acknowledge the append
    ///
    /// If the client drops the sender without resolving it, the wait is
    /// reported as interrupted.
    pub async fn wait(self) -> AckResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(AckError::Interrupted(
                "append acknowledgment was abandoned by the log client".to_string(),
            )),
        }
    }
}

/// Append side of a log client
#[async_trait]
pub trait LogProducer<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Issue an asynchronous append
    ///
    /// Returns immediately; the outcome is observed through the returned
    /// [`PendingAppend`].
    fn send(&self, record: ProducerRecord<K, V>) -> PendingAppend;

    /// Release the producer
    async fn close(&self);
}

/// Read side of a log client
///
/// Operations other than [`wakeup`](LogConsumer::wakeup) are not meant to be
/// invoked concurrently; callers serialize them.
#[async_trait]
pub trait LogConsumer<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Statically assign the given partitions, replacing any previous assignment
    fn assign(&self, partitions: &[TopicPartition]) -> Result<(), LogError>;

    /// Move the position of each given partition to its first offset
    fn seek_to_beginning(&self, partitions: &[TopicPartition]) -> Result<(), LogError>;

    /// Wait up to `timeout` for records from assigned partitions
    ///
    /// Returns an empty batch if nothing arrived in time.
    async fn poll(&self, timeout: Duration) -> Result<RecordBatch<K, V>, LogError>;

    /// End offset (one past the last entry) of each given partition
    async fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, u64>, LogError>;

    /// Abort the blocking call in progress, or the next one if none is
    ///
    /// The aborted call fails with [`LogError::Wakeup`]. Safe to call from
    /// any task.
    fn wakeup(&self);

    /// Release the consumer
    async fn close(&self);
}

#[async_trait]
impl<K, V, T> LogProducer<K, V> for Arc<T>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    T: LogProducer<K, V> + ?Sized,
{
    fn send(&self, record: ProducerRecord<K, V>) -> PendingAppend {
        (**self).send(record)
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[async_trait]
impl<K, V, T> LogConsumer<K, V> for Arc<T>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    T: LogConsumer<K, V> + ?Sized,
{
    fn assign(&self, partitions: &[TopicPartition]) -> Result<(), LogError> {
        (**self).assign(partitions)
    }

    fn seek_to_beginning(&self, partitions: &[TopicPartition]) -> Result<(), LogError> {
        (**self).seek_to_beginning(partitions)
    }

    async fn poll(&self, timeout: Duration) -> Result<RecordBatch<K, V>, LogError> {
        (**self).poll(timeout).await
    }

    async fn end_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, u64>, LogError> {
        (**self).end_offsets(partitions).await
    }

    fn wakeup(&self) {
        (**self).wakeup()
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready_ok, task};

    fn metadata(offset: u64) -> RecordMetadata {
        RecordMetadata {
            topic: "commands".to_string(),
            partition: 0,
            offset,
        }
    }

    /// Both traits must stay object-safe
    fn _assert_object_safe(
        _: &dyn LogProducer<String, String>,
        _: &dyn LogConsumer<String, String>,
    ) {
    }

    #[test]
    fn test_runtime_cause_reports_message_only() {
        let cause = AppendCause::runtime("IllegalState", "Send was unsuccessful!");
        assert_eq!(cause.to_string(), "Send was unsuccessful!");
        assert!(cause.is_runtime());
    }

    #[test]
    fn test_other_cause_reports_kind_prefix() {
        let cause = AppendCause::other("TimeoutError", "Expiring 1 record(s)");
        assert_eq!(cause.to_string(), "TimeoutError: Expiring 1 record(s)");
    }

    #[tokio::test]
    async fn test_ready_pending_append() {
        let pending = PendingAppend::ready(Ok(metadata(7)));
        let ack = assert_ok!(pending.wait().await);
        assert_eq!(ack.offset, 7);
    }

    #[test]
    fn test_pending_append_waits_for_acknowledgment() {
        let (sender, pending) = PendingAppend::channel();
        let mut wait = task::spawn(pending.wait());
        assert_pending!(wait.poll());

        sender.complete(Ok(metadata(3)));
        assert!(wait.is_woken());
        let ack = assert_ready_ok!(wait.poll());
        assert_eq!(ack.offset, 3);
    }

    #[tokio::test]
    async fn test_pending_append_completed_later() {
        let (sender, pending) = PendingAppend::channel();
        let waiter = tokio::spawn(pending.wait());
        sender.complete(Err(AckError::Failed(AppendCause::runtime("E", "boom"))));

        let result = waiter.await.unwrap();
        assert_eq!(result, Err(AckError::Failed(AppendCause::runtime("E", "boom"))));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_interrupted() {
        let (sender, pending) = PendingAppend::channel();
        drop(sender);
        let err = assert_err!(pending.wait().await);
        assert!(matches!(err, AckError::Interrupted(_)));
    }
}
