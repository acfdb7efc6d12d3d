//! Background loop that applies the command log to local state
//!
//! A runner first replays the partition from the beginning, then tails it,
//! handing every command to a [`CommandExecutor`] in log order. It is the
//! only user of the channel's consumer side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};

use cmdlog_core::{Command, CommandId, LogConsumer, LogProducer, QueuedCommand};

use crate::channel::CommandChannel;
use crate::config::RunnerConfig;
use crate::error::{ChannelError, ExecutionError, RunnerError};

/// Applies a decoded command to engine state
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &QueuedCommand) -> Result<(), ExecutionError>;
}

/// Counters reported when a runner stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Commands applied during the startup replay
    pub replayed: usize,
    /// Commands applied while tailing
    pub executed: usize,
    /// Commands the executor rejected, in either phase
    pub failed: usize,
    /// Offset of the last command handed to the executor
    pub last_offset: Option<u64>,
}

/// Replay-then-tail loop over a [`CommandChannel`]
pub struct CommandRunner<P, C, E> {
    channel: Arc<CommandChannel<P, C>>,
    executor: Arc<E>,
    config: RunnerConfig,
    closed: Arc<AtomicBool>,
    stopped: Arc<Notify>,
    stats: RunnerStats,
}

impl<P, C, E> CommandRunner<P, C, E>
where
    P: LogProducer<CommandId, Command> + 'static,
    C: LogConsumer<CommandId, Command> + 'static,
    E: CommandExecutor + 'static,
{
    /// Spawn the runner as a background task
    ///
    /// The task runs inside the caller's current span.
    pub fn spawn(
        channel: Arc<CommandChannel<P, C>>,
        executor: Arc<E>,
        config: RunnerConfig,
    ) -> RunnerHandle<P, C> {
        let closed = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(Notify::new());
        let runner = Self {
            channel: channel.clone(),
            executor,
            config,
            closed: closed.clone(),
            stopped: stopped.clone(),
            stats: RunnerStats::default(),
        };

        let join = tokio::spawn(runner.run().instrument(Span::current()));
        RunnerHandle {
            channel,
            closed,
            stopped,
            join,
        }
    }

    async fn run(mut self) -> Result<RunnerStats, ChannelError> {
        info!(
            topic = %self.channel.topic(),
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            "Command runner started"
        );

        if !self.replay().await? {
            info!("Command runner stopped during replay");
            return Ok(self.stats);
        }

        while !self.is_closed() {
            match self.channel.poll_new_commands(self.config.poll_timeout).await {
                Ok(commands) => {
                    for command in &commands {
                        self.apply(command, false).await;
                    }
                }
                Err(e) if e.is_cancelled() => {
                    if !self.is_closed() {
                        debug!("Poll interrupted without a stop request");
                    }
                }
                Err(ChannelError::Closed) => break,
                Err(e) => {
                    warn!(error = %e, "Polling the command log failed");
                    self.back_off().await;
                }
            }
        }

        info!(
            replayed = self.stats.replayed,
            executed = self.stats.executed,
            failed = self.stats.failed,
            "Command runner stopped"
        );
        Ok(self.stats)
    }

    /// Replay the log into the executor
    ///
    /// Returns `false` if the runner was stopped before replay finished.
    async fn replay(&mut self) -> Result<bool, ChannelError> {
        loop {
            if self.is_closed() {
                return Ok(false);
            }
            match self
                .channel
                .replay_with_offsets(self.config.replay_poll_timeout)
                .await
            {
                Ok(commands) => {
                    for command in &commands {
                        self.apply(command, true).await;
                    }
                    info!(commands = commands.len(), "Restored state from command log");
                    return Ok(true);
                }
                Err(e) if e.is_cancelled() => continue,
                Err(ChannelError::Closed) => return Ok(false),
                Err(e) => {
                    warn!(error = %e, "Replaying the command log failed, retrying");
                    self.back_off().await;
                }
            }
        }
    }

    async fn apply(&mut self, command: &QueuedCommand, replaying: bool) {
        match self.executor.execute(command).await {
            Ok(()) if replaying => self.stats.replayed += 1,
            Ok(()) => self.stats.executed += 1,
            Err(e) => {
                self.stats.failed += 1;
                warn!(
                    command_id = %command.command_id,
                    offset = ?command.sequence,
                    error = %e,
                    "Command execution failed"
                );
            }
        }
        if command.sequence.is_some() {
            self.stats.last_offset = command.sequence;
        }
    }

    /// Wait out the error backoff, returning early on stop
    async fn back_off(&self) {
        let stopped = self.stopped.notified();
        if self.is_closed() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.error_backoff) => {}
            _ = stopped => {}
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Control handle of a spawned [`CommandRunner`]
pub struct RunnerHandle<P, C> {
    channel: Arc<CommandChannel<P, C>>,
    closed: Arc<AtomicBool>,
    stopped: Arc<Notify>,
    join: JoinHandle<Result<RunnerStats, ChannelError>>,
}

impl<P, C> RunnerHandle<P, C>
where
    P: LogProducer<CommandId, Command>,
    C: LogConsumer<CommandId, Command>,
{
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the runner and wait for it to exit
    ///
    /// Interrupts the channel so a blocked poll returns promptly.
    pub async fn stop(self) -> Result<RunnerStats, RunnerError> {
        self.closed.store(true, Ordering::SeqCst);
        self.stopped.notify_waiters();
        self.channel.interrupt();

        let stats = self
            .join
            .await
            .map_err(|e| RunnerError::TaskFailed(e.to_string()))??;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::time::Duration;

    use cmdlog_core::{CommandAction, CommandKind, LogError, RecordBatch, TopicPartition};
    use cmdlog_memlog::MemoryLog;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        applied: Mutex<Vec<QueuedCommand>>,
        reject_statement: Option<String>,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn execute(&self, command: &QueuedCommand) -> Result<(), ExecutionError> {
            if self.reject_statement.as_deref() == Some(command.command.statement()) {
                return Err(ExecutionError::new("rejected"));
            }
            self.applied.lock().push(command.clone());
            Ok(())
        }
    }

    fn id(name: &str) -> CommandId {
        CommandId::new(CommandKind::Table, name, CommandAction::Create).unwrap()
    }

    fn config() -> RunnerConfig {
        RunnerConfig {
            poll_timeout: Duration::from_millis(20),
            replay_poll_timeout: Duration::from_millis(20),
            error_backoff: Duration::from_millis(5),
        }
    }

    async fn wait_for(executor: &RecordingExecutor, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while executor.applied.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("executor should catch up");
    }

    #[tokio::test]
    async fn test_runner_replays_then_tails() {
        let log = MemoryLog::new();
        let channel = Arc::new(
            CommandChannel::new("commands", log.command_producer(), log.command_consumer())
                .unwrap(),
        );

        channel.send(id("a"), Command::new("CREATE TABLE a;")).await.unwrap();
        channel.send(id("b"), Command::new("CREATE TABLE b;")).await.unwrap();

        let executor = Arc::new(RecordingExecutor::default());
        let handle = CommandRunner::spawn(channel.clone(), executor.clone(), config());
        wait_for(&executor, 2).await;

        channel.send(id("c"), Command::new("CREATE TABLE c;")).await.unwrap();
        wait_for(&executor, 3).await;

        let stats = handle.stop().await.unwrap();
        assert_eq!(stats.replayed, 2);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.last_offset, Some(2));

        let order: Vec<_> = executor
            .applied
            .lock()
            .iter()
            .map(|c| c.command_id.entity().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_executor_failures_do_not_stop_runner() {
        let log = MemoryLog::new();
        let channel = Arc::new(
            CommandChannel::new("commands", log.command_producer(), log.command_consumer())
                .unwrap(),
        );
        channel.send(id("bad"), Command::new("BROKEN;")).await.unwrap();
        channel.send(id("good"), Command::new("CREATE TABLE good;")).await.unwrap();

        let executor = Arc::new(RecordingExecutor {
            reject_statement: Some("BROKEN;".to_string()),
            ..Default::default()
        });
        let handle = CommandRunner::spawn(channel, executor.clone(), config());
        wait_for(&executor, 1).await;

        let stats = handle.stop().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.replayed, 1);
    }

    /// Consumer whose every poll fails with a non-cancellation error
    struct BrokenConsumer;

    #[async_trait]
    impl LogConsumer<CommandId, Command> for BrokenConsumer {
        fn assign(&self, _partitions: &[TopicPartition]) -> Result<(), LogError> {
            Ok(())
        }

        fn seek_to_beginning(&self, _partitions: &[TopicPartition]) -> Result<(), LogError> {
            Ok(())
        }

        async fn poll(
            &self,
            _timeout: Duration,
        ) -> Result<RecordBatch<CommandId, Command>, LogError> {
            Err(LogError::Io("broker unreachable".to_string()))
        }

        async fn end_offsets(
            &self,
            _partitions: &[TopicPartition],
        ) -> Result<HashMap<TopicPartition, u64>, LogError> {
            Ok(HashMap::new())
        }

        fn wakeup(&self) {}

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_stop_cuts_error_backoff_short() {
        let log = MemoryLog::new();
        let channel = Arc::new(
            CommandChannel::new("commands", log.command_producer(), BrokenConsumer).unwrap(),
        );
        let executor = Arc::new(RecordingExecutor::default());
        let patient = RunnerConfig {
            error_backoff: Duration::from_secs(3600),
            ..config()
        };

        let handle = CommandRunner::spawn(channel, executor, patient);
        // Let the first replay attempt fail and enter its backoff
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("stop should not wait out the backoff")
            .unwrap();
        assert_eq!(stats, RunnerStats::default());
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_poll() {
        let log = MemoryLog::new();
        let channel = Arc::new(
            CommandChannel::new("commands", log.command_producer(), log.command_consumer())
                .unwrap(),
        );
        let executor = Arc::new(RecordingExecutor::default());
        let slow = RunnerConfig {
            poll_timeout: Duration::from_secs(3600),
            ..config()
        };

        let handle = CommandRunner::spawn(channel, executor, slow);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("stop should interrupt the hour-long poll")
            .unwrap();
        assert_eq!(stats, RunnerStats::default());
    }
}
