//! Multi-node simulation of servers sharing one command log
//!
//! Nodes run over a shared [`MemoryLog`](cmdlog_memlog::MemoryLog). Each
//! replays the log on start, tails it afterwards and applies every command to
//! a toy engine state. Scenarios check that all nodes agree.

pub mod cluster;
pub mod scenarios;

pub use cluster::{Cluster, EngineState, MemoryChannel, Snapshot};
pub use scenarios::{ScenarioReport, run_converge, run_interrupt, run_restart};
