//! # Cmdlog Channel
//!
//! The command log channel routes every cluster command through a single,
//! totally ordered partition of an external log service.
//!
//! The partition is both the synchronization point (one ordered append
//! stream) and the source of truth every server replays on startup to rebuild
//! identical state.
//!
//! ## Features
//!
//! - **CommandChannel**: send, live-tail polling, full replay, end offset,
//!   interrupt and shutdown over one fixed partition
//! - **CommandRunner**: background replay-then-tail loop that hands each
//!   command to a [`CommandExecutor`]
//! - **ChannelConfig**: topic and timeouts, with environment overrides
//!
//! ## Example
//!
//! ```rust,ignore
//! use cmdlog_channel::{ChannelConfig, CommandChannel};
//! use cmdlog_memlog::MemoryLog;
//!
//! let log = MemoryLog::new();
//! let config = ChannelConfig::default();
//! let channel = CommandChannel::new(
//!     config.topic.clone(),
//!     log.command_producer(),
//!     log.command_consumer(),
//! )?;
//!
//! channel.send(id, command).await?;
//! let history = channel.replay_from_start(config.replay_poll_timeout).await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod runner;

pub use channel::{COMMAND_PARTITION, CommandChannel};
pub use config::{ChannelConfig, RunnerConfig};
pub use error::{ChannelError, ExecutionError, RunnerError};
pub use runner::{CommandExecutor, CommandRunner, RunnerHandle, RunnerStats};
