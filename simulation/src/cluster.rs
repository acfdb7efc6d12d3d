//! A simulated cluster of servers sharing one in-memory command log
//!
//! Every node owns a [`CommandChannel`], a [`CommandRunner`] and an
//! [`EngineState`]. Any node may submit a command; all of them must end up
//! with the same state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use cmdlog_channel::{
    ChannelConfig, CommandChannel, CommandExecutor, CommandRunner, ExecutionError, RunnerHandle,
    RunnerStats,
};
use cmdlog_core::{
    Command, CommandAction, CommandId, CommandKind, QueuedCommand, RecordMetadata,
    TopicPartition,
};
use cmdlog_logging::NodeContextGuard;
use cmdlog_memlog::{MemoryConsumer, MemoryLog, MemoryProducer};

pub type MemoryChannel =
    CommandChannel<MemoryProducer<CommandId, Command>, MemoryConsumer<CommandId, Command>>;

type MemoryRunner =
    RunnerHandle<MemoryProducer<CommandId, Command>, MemoryConsumer<CommandId, Command>>;

/// Point-in-time view of a node's state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Live entities, `kind/entity` to defining statement
    pub entities: BTreeMap<String, String>,
    /// Statements of `execute` commands and terminations, in order
    pub executed: Vec<String>,
    /// Offset of the last command handed to the node
    pub applied_through: Option<u64>,
}

/// Toy engine state rebuilt from the command log
#[derive(Debug, Default)]
pub struct EngineState {
    inner: Mutex<Snapshot>,
}

impl EngineState {
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for EngineState {
    async fn execute(&self, queued: &QueuedCommand) -> Result<(), ExecutionError> {
        let id = &queued.command_id;
        let key = format!("{}/{}", id.kind(), id.entity());
        let statement = queued.command.statement().to_string();

        let mut state = self.inner.lock();
        state.applied_through = queued.sequence.or(state.applied_through);

        match (id.kind(), id.action()) {
            (CommandKind::Terminate, _) | (_, CommandAction::Execute) => {
                state.executed.push(statement);
            }
            (_, CommandAction::Create) => {
                state.entities.insert(key, statement);
            }
            (_, CommandAction::Drop) => {
                if state.entities.remove(&key).is_none() {
                    return Err(ExecutionError::new(format!("{key} does not exist")));
                }
            }
        }
        Ok(())
    }
}

struct Node {
    name: String,
    channel: Arc<MemoryChannel>,
    state: Arc<EngineState>,
    runner: MemoryRunner,
}

impl Node {
    fn start(log: &MemoryLog, config: &ChannelConfig, name: String) -> anyhow::Result<Self> {
        let context = NodeContextGuard::new(name.as_str());
        let span = context.span();
        let _enter = span.enter();

        let channel = Arc::new(CommandChannel::new(
            config.topic.clone(),
            log.command_producer(),
            log.command_consumer(),
        )?);
        let state = Arc::new(EngineState::default());
        let runner = CommandRunner::spawn(channel.clone(), state.clone(), config.runner());
        info!(topic = %config.topic, "Node started");

        Ok(Self {
            name,
            channel,
            state,
            runner,
        })
    }

    async fn stop(self) -> anyhow::Result<(String, RunnerStats)> {
        let stats = self.runner.stop().await?;
        self.channel.shutdown().await;
        Ok((self.name, stats))
    }
}

/// Servers sharing one command topic
pub struct Cluster {
    log: MemoryLog,
    config: ChannelConfig,
    nodes: Vec<Node>,
}

impl Cluster {
    /// Start `size` nodes over a fresh log
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(size: usize, config: ChannelConfig) -> anyhow::Result<Self> {
        Self::start_on(MemoryLog::new(), size, config)
    }

    /// Start `size` nodes over an existing log
    pub fn start_on(log: MemoryLog, size: usize, config: ChannelConfig) -> anyhow::Result<Self> {
        if size == 0 {
            bail!("a cluster needs at least one node");
        }
        let nodes = (0..size)
            .map(|i| Node::start(&log, &config, format!("node-{i}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { log, config, nodes })
    }

    pub fn log(&self) -> &MemoryLog {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, index: usize) -> anyhow::Result<&Node> {
        self.nodes
            .get(index)
            .with_context(|| format!("no node {index} in a cluster of {}", self.nodes.len()))
    }

    /// Channel of one node, for driving sends and interrupts directly
    pub fn channel(&self, index: usize) -> anyhow::Result<Arc<MemoryChannel>> {
        Ok(self.node(index)?.channel.clone())
    }

    pub fn snapshot(&self, index: usize) -> anyhow::Result<Snapshot> {
        Ok(self.node(index)?.state.snapshot())
    }

    /// Submit a command through one node's channel
    pub async fn submit(
        &self,
        index: usize,
        id: CommandId,
        command: Command,
    ) -> anyhow::Result<RecordMetadata> {
        let node = self.node(index)?;
        let metadata = node
            .channel
            .send(id, command)
            .await
            .with_context(|| format!("{} failed to send", node.name))?;
        Ok(metadata)
    }

    /// Offset one past the last command in the log
    pub fn end_offset(&self) -> u64 {
        self.log
            .end_offset(&TopicPartition::new(self.config.topic.as_str(), 0))
            .unwrap_or(0)
    }

    /// Wait until every node has applied the whole log and agrees on state
    pub async fn wait_converged(&self, timeout: Duration) -> anyhow::Result<Snapshot> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let target = self.end_offset().checked_sub(1);
            let snapshots: Vec<_> = self.nodes.iter().map(|n| n.state.snapshot()).collect();

            let caught_up = snapshots.iter().all(|s| s.applied_through == target);
            if caught_up && snapshots.windows(2).all(|w| w[0] == w[1]) {
                debug!(end_offset = self.end_offset(), "Cluster converged");
                return Ok(snapshots.into_iter().next().unwrap_or_default());
            }

            if tokio::time::Instant::now() >= deadline {
                let positions: Vec<_> = snapshots.iter().map(|s| s.applied_through).collect();
                bail!("cluster did not converge on {target:?}, nodes at {positions:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Replace a node with a fresh one that rebuilds state from the log
    ///
    /// Returns the stats of the stopped runner.
    pub async fn restart(&mut self, index: usize) -> anyhow::Result<RunnerStats> {
        self.node(index)?;
        let old = self.nodes.remove(index);
        let name = old.name.clone();
        let (_, stats) = old.stop().await?;

        let fresh = Node::start(&self.log, &self.config, name)?;
        self.nodes.insert(index, fresh);
        Ok(stats)
    }

    /// Stop every node, returning per-node runner stats
    pub async fn stop(self) -> anyhow::Result<Vec<(String, RunnerStats)>> {
        let mut all = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            all.push(node.stop().await?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(
        kind: CommandKind,
        entity: &str,
        action: CommandAction,
        offset: u64,
    ) -> QueuedCommand {
        QueuedCommand::at_offset(
            CommandId::new(kind, entity, action).unwrap(),
            Command::new(format!("{action} {entity}")),
            offset,
        )
    }

    #[tokio::test]
    async fn test_engine_state_applies_actions() {
        let state = EngineState::default();
        state
            .execute(&queued(CommandKind::Stream, "a", CommandAction::Create, 0))
            .await
            .unwrap();
        state
            .execute(&queued(CommandKind::Table, "b", CommandAction::Create, 1))
            .await
            .unwrap();
        state
            .execute(&queued(CommandKind::Stream, "a", CommandAction::Drop, 2))
            .await
            .unwrap();
        state
            .execute(&queued(CommandKind::Terminate, "q1", CommandAction::Execute, 3))
            .await
            .unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.entities.keys().collect::<Vec<_>>(), vec!["table/b"]);
        assert_eq!(snapshot.executed, vec!["execute q1".to_string()]);
        assert_eq!(snapshot.applied_through, Some(3));
    }

    #[tokio::test]
    async fn test_drop_of_missing_entity_fails_but_advances() {
        let state = EngineState::default();
        let result = state
            .execute(&queued(CommandKind::Stream, "ghost", CommandAction::Drop, 4))
            .await;
        assert!(result.is_err());
        assert_eq!(state.snapshot().applied_through, Some(4));
    }

    #[tokio::test]
    async fn test_empty_cluster_is_rejected() {
        assert!(Cluster::start(0, ChannelConfig::default()).is_err());
    }
}
