//! The command log channel
//!
//! Every command goes through partition 0 of the command topic. That single
//! partition is what gives the cluster one total order: all servers append to
//! it and all servers replay it, so they rebuild the same state.

use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, instrument, warn};

use cmdlog_core::{
    Command, CommandId, ConsumerRecord, LogConsumer, LogError, LogProducer, ProducerRecord,
    QueuedCommand, RecordBatch, RecordMetadata, TopicPartition,
};

use crate::error::ChannelError;

/// The only partition of the command topic the channel ever touches
pub const COMMAND_PARTITION: u32 = 0;

const SEND_INTERRUPTED: &str = "append acknowledgment wait interrupted";

/// Ordered, durable command channel over one log partition
///
/// The channel exclusively owns its producer and consumer. Consumer
/// operations (poll, seek, end-offset queries) are serialized internally;
/// [`interrupt`](Self::interrupt) bypasses that serialization so it can
/// unblock a poll running on another task.
pub struct CommandChannel<P, C> {
    partition: TopicPartition,
    producer: P,
    consumer: C,
    consumer_lock: Mutex<()>,
    /// Wakes `send` calls waiting for an acknowledgment
    interrupted: Notify,
    closed: AtomicBool,
}

impl<P, C> CommandChannel<P, C>
where
    P: LogProducer<CommandId, Command>,
    C: LogConsumer<CommandId, Command>,
{
    /// Bind a channel to partition 0 of `topic`
    ///
    /// The consumer is assigned to exactly that partition before this
    /// returns; there is no subscription and no rebalancing.
    pub fn new(topic: impl Into<String>, producer: P, consumer: C) -> Result<Self, ChannelError> {
        let partition = TopicPartition::new(topic, COMMAND_PARTITION);
        consumer.assign(slice::from_ref(&partition))?;
        info!(partition = %partition, "Command channel assigned");

        Ok(Self {
            partition,
            producer,
            consumer,
            consumer_lock: Mutex::new(()),
            interrupted: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn topic(&self) -> &str {
        &self.partition.topic
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Append a command and wait until the log acknowledges it
    ///
    /// Returns the acknowledged position. Nothing is retried here; if the
    /// wait is cancelled the append may still land.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::AppendFailed`] if the log rejected the append
    /// - [`ChannelError::WaitCancelled`] if the wait was interrupted
    /// - [`ChannelError::Closed`] after [`shutdown`](Self::shutdown)
    #[instrument(skip(self, id, command), fields(command_id = %id))]
    pub async fn send(
        &self,
        id: CommandId,
        command: Command,
    ) -> Result<RecordMetadata, ChannelError> {
        self.ensure_open()?;

        // Registered before the append is issued so an interrupt cannot slip in between
        let interrupted = self.interrupted.notified();
        let record = ProducerRecord::to_partition(
            self.partition.topic.clone(),
            COMMAND_PARTITION,
            id,
            command,
        );
        let pending = self.producer.send(record);

        let result = tokio::select! {
            biased;
            ack = pending.wait() => ack.map_err(ChannelError::from),
            _ = interrupted => Err(ChannelError::WaitCancelled {
                message: SEND_INTERRUPTED.to_string(),
            }),
        };

        match &result {
            Ok(metadata) => debug!(offset = metadata.offset, "Command appended"),
            Err(e) => warn!(error = %e, "Command append failed"),
        }
        result
    }

    /// Poll once for new entries
    ///
    /// Returns exactly what the log client returned, which is empty if
    /// nothing arrived within `timeout`.
    pub async fn poll_new(
        &self,
        timeout: Duration,
    ) -> Result<RecordBatch<CommandId, Command>, ChannelError> {
        self.ensure_open()?;
        let _consumer = self.consumer_lock.lock().await;
        let batch = self.consumer.poll(timeout).await?;
        debug!(records = batch.len(), "Polled command log");
        Ok(batch)
    }

    /// Poll once and convert the entries into commands, dropping tombstones
    ///
    /// Each command carries its log offset as `sequence`.
    pub async fn poll_new_commands(
        &self,
        timeout: Duration,
    ) -> Result<Vec<QueuedCommand>, ChannelError> {
        let batch = self.poll_new(timeout).await?;
        Ok(batch.into_iter().filter_map(queued).collect())
    }

    /// Re-read the whole partition from its first offset
    ///
    /// Polls until a poll comes back empty, which marks the end of the
    /// backlog. Commands are returned in log order with no sequence number;
    /// duplicate ids are kept and tombstones are dropped.
    pub async fn replay_from_start(
        &self,
        poll_timeout: Duration,
    ) -> Result<Vec<QueuedCommand>, ChannelError> {
        let restored = self.replay_with_offsets(poll_timeout).await?;
        Ok(restored
            .into_iter()
            .map(|queued| QueuedCommand::new(queued.command_id, queued.command))
            .collect())
    }

    /// Same as [`replay_from_start`](Self::replay_from_start), but every
    /// command carries its log offset as `sequence`
    #[instrument(skip(self), fields(partition = %self.partition))]
    pub async fn replay_with_offsets(
        &self,
        poll_timeout: Duration,
    ) -> Result<Vec<QueuedCommand>, ChannelError> {
        self.ensure_open()?;
        let _consumer = self.consumer_lock.lock().await;
        self.consumer
            .seek_to_beginning(slice::from_ref(&self.partition))?;

        let mut restored = Vec::new();
        let mut tombstones = 0usize;
        let mut polls = 0usize;

        loop {
            let batch = self.consumer.poll(poll_timeout).await?;
            polls += 1;
            if batch.is_empty() {
                break;
            }
            for record in batch {
                match queued(record) {
                    Some(command) => restored.push(command),
                    None => tombstones += 1,
                }
            }
        }

        info!(
            commands = restored.len(),
            tombstones, polls, "Replayed command log"
        );
        Ok(restored)
    }

    /// End offset of the command partition, i.e. its length
    pub async fn end_offset(&self) -> Result<u64, ChannelError> {
        self.ensure_open()?;
        let _consumer = self.consumer_lock.lock().await;
        let offsets = self
            .consumer
            .end_offsets(slice::from_ref(&self.partition))
            .await?;
        offsets
            .get(&self.partition)
            .copied()
            .ok_or_else(|| ChannelError::Log(LogError::UnknownPartition(self.partition.clone())))
    }

    /// Unblock a poll or acknowledgment wait running on another task
    ///
    /// The blocked call fails with [`ChannelError::WaitCancelled`]. If no
    /// poll is in progress, the next one fails instead. Resources stay open.
    pub fn interrupt(&self) {
        debug!("Interrupting command channel");
        self.consumer.wakeup();
        self.interrupted.notify_waiters();
    }

    /// Close the consumer and then the producer
    ///
    /// Only the first call does anything; afterwards every operation fails
    /// with [`ChannelError::Closed`]. A poll holding the consumer finishes
    /// before the consumer is closed, so stop the tail loop first.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _consumer = self.consumer_lock.lock().await;
            self.consumer.close().await;
        }
        self.producer.close().await;
        info!(partition = %self.partition, "Command channel shut down");
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_shut_down() {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }
}

/// A surviving entry becomes a command at its offset; a tombstone becomes nothing
fn queued(record: ConsumerRecord<CommandId, Command>) -> Option<QueuedCommand> {
    let ConsumerRecord {
        key, value, offset, ..
    } = record;
    value.map(|command| QueuedCommand::at_offset(key, command, offset))
}
