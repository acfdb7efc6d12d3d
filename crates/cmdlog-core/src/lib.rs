//! # Cmdlog Core
//!
//! Core types, traits, and errors for the cmdlog command log.
//!
//! Every schema-changing command issued to a cluster is appended to a single
//! partition of an external log service. This crate holds the vocabulary the
//! rest of the workspace shares, so the command channel can run against a real
//! log client or the in-memory log used by tests and simulation.
//!
//! ## Key Traits
//!
//! - [`LogProducer`]: Appends keyed records and hands back a [`PendingAppend`]
//! - [`LogConsumer`]: Statically assigned, bounded-poll reader of a partition
//! - [`Codec`]: Opaque serialization of keys and values to log entries
//!
//! ## Key Types
//!
//! - [`CommandId`]: Identity key of a log entry
//! - [`Command`]: The opaque statement payload
//! - [`QueuedCommand`]: A surviving log entry handed to the executor
//! - [`RecordBatch`]: One poll's worth of raw [`ConsumerRecord`]s

pub mod client;
pub mod codec;
pub mod command;
pub mod error;
pub mod record;

// Re-export main types
pub use client::*;
pub use codec::*;
pub use command::*;
pub use error::*;
pub use record::*;
