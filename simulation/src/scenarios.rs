//! Scripted runs over a simulated cluster

use std::fmt;
use std::time::Duration;

use anyhow::{Context, ensure};
use tracing::info;

use cmdlog_channel::{ChannelConfig, RunnerStats};
use cmdlog_core::{Command, CommandAction, CommandId, CommandKind, TopicPartition};

use crate::cluster::Cluster;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a scenario
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub nodes: usize,
    /// Commands in the log at the end of the run
    pub commands: u64,
    /// Entities alive on every node
    pub entities: usize,
    pub stats: Vec<(String, RunnerStats)>,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} nodes converged on {} commands, {} live entities",
            self.name, self.nodes, self.commands, self.entities
        )?;
        for (node, stats) in &self.stats {
            writeln!(
                f,
                "  {node}: replayed={} executed={} failed={} last_offset={:?}",
                stats.replayed, stats.executed, stats.failed, stats.last_offset
            )?;
        }
        Ok(())
    }
}

/// Channel settings tuned for quick simulated runs
pub fn scenario_config() -> ChannelConfig {
    ChannelConfig::default()
        .with_topic("simulation_commands")
        .with_poll_timeout(Duration::from_millis(50))
        .with_replay_poll_timeout(Duration::from_millis(50))
        .with_error_backoff(Duration::from_millis(10))
}

/// The `index`-th command of the synthetic workload
///
/// Mostly stream creations, with periodic inserts and drops of earlier
/// streams so replay order matters.
pub fn workload(index: u64) -> anyhow::Result<(CommandId, Command)> {
    let (kind, entity, action, statement) = match index % 7 {
        5 => (
            CommandKind::Stream,
            format!("insert_{index}"),
            CommandAction::Execute,
            format!("INSERT INTO s{} (id) VALUES ({index});", index - 1),
        ),
        6 => (
            CommandKind::Stream,
            format!("s{}", index - 3),
            CommandAction::Drop,
            format!("DROP STREAM s{};", index - 3),
        ),
        _ => (
            CommandKind::Stream,
            format!("s{index}"),
            CommandAction::Create,
            format!("CREATE STREAM s{index} (id INT) WITH (kafka_topic='s{index}');"),
        ),
    };
    let id = CommandId::new(kind, entity, action)?;
    Ok((id, Command::new(statement).with_property("auto.offset.reset", "earliest")))
}

/// Live entities after the first `count` workload commands
pub fn expected_entities(count: u64) -> usize {
    let created = (0..count).filter(|i| i % 7 < 5).count();
    let dropped = (0..count).filter(|i| i % 7 == 6).count();
    created - dropped
}

async fn submit_range(cluster: &Cluster, range: std::ops::Range<u64>) -> anyhow::Result<()> {
    for i in range {
        let (id, command) = workload(i)?;
        cluster.submit(i as usize % cluster.len(), id, command).await?;
    }
    Ok(())
}

async fn finish(name: &'static str, cluster: Cluster) -> anyhow::Result<ScenarioReport> {
    let converged = cluster.wait_converged(CONVERGE_TIMEOUT).await?;
    let nodes = cluster.len();
    let commands = cluster.end_offset();
    let stats = cluster.stop().await?;
    Ok(ScenarioReport {
        name,
        nodes,
        commands,
        entities: converged.entities.len(),
        stats,
    })
}

/// Round-robin submissions from every node, then check agreement
pub async fn run_converge(nodes: usize, commands: u64) -> anyhow::Result<ScenarioReport> {
    let cluster = Cluster::start(nodes, scenario_config())?;
    submit_range(&cluster, 0..commands).await?;

    let report = finish("converge", cluster).await?;
    ensure!(
        report.entities == expected_entities(commands),
        "expected {} live entities, found {}",
        expected_entities(commands),
        report.entities
    );
    info!(nodes, commands, "Converge scenario passed");
    Ok(report)
}

/// Restart a node halfway and check it rebuilds the same state
pub async fn run_restart(nodes: usize, commands: u64) -> anyhow::Result<ScenarioReport> {
    let mut cluster = Cluster::start(nodes, scenario_config())?;
    let half = commands / 2;

    submit_range(&cluster, 0..half).await?;
    cluster.wait_converged(CONVERGE_TIMEOUT).await?;
    let before = cluster.restart(0).await?;
    info!(
        applied = before.replayed + before.executed + before.failed,
        "Restarted node-0"
    );

    submit_range(&cluster, half..commands).await?;
    let report = finish("restart", cluster).await?;

    let (_, restarted) = report.stats.first().context("cluster lost its first node")?;
    let handled = (restarted.replayed + restarted.executed + restarted.failed) as u64;
    ensure!(
        handled == commands,
        "restarted node handled {handled} of {commands} commands"
    );
    Ok(report)
}

/// Interrupt a send whose acknowledgment never arrives
///
/// The wait is cancelled but the append stands, so every node still applies
/// the command.
pub async fn run_interrupt(nodes: usize) -> anyhow::Result<ScenarioReport> {
    let config = scenario_config();
    let cluster = Cluster::start(nodes, config.clone())?;
    let log = cluster.log().clone();
    let partition = TopicPartition::new(config.topic.as_str(), 0);

    log.hold_acks();
    let channel = cluster.channel(0)?;
    let (id, command) = workload(0)?;
    let send = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send(id, command).await }
    });

    tokio::time::timeout(CONVERGE_TIMEOUT, async {
        while log.end_offset(&partition).unwrap_or(0) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("append never reached the log")?;

    channel.interrupt();
    let outcome = send.await?;
    ensure!(
        matches!(&outcome, Err(e) if e.is_cancelled()),
        "expected a cancelled send, got {outcome:?}"
    );
    info!("Send interrupted while waiting for its acknowledgment");
    log.release_acks();

    finish("interrupt", cluster).await
}
