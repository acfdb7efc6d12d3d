//! # Cmdlog Memlog
//!
//! An in-memory, partitioned, append-only log service that implements the
//! [`LogProducer`](cmdlog_core::LogProducer) and
//! [`LogConsumer`](cmdlog_core::LogConsumer) traits.
//!
//! It stands in for the external log service in tests and simulation. Each
//! topic is a fixed set of partitions; each partition is an ordered vector of
//! encoded entries whose offset is its index.
//!
//! ## Features
//!
//! - Keyed appends with optional (tombstone) values
//! - Bounded polls that wake as soon as new entries land
//! - Seek-to-beginning, end offsets, wakeup and close
//! - Fault injection: failed appends and held acknowledgments
//!
//! ## Example
//!
//! ```rust,ignore
//! use cmdlog_core::{LogConsumer, LogProducer, ProducerRecord, TopicPartition};
//! use cmdlog_memlog::MemoryLog;
//!
//! let log = MemoryLog::new();
//! let producer = log.json_producer::<String, String>();
//! let consumer = log.json_consumer::<String, String>();
//!
//! producer
//!     .send(ProducerRecord::to_partition("t", 0, "k".into(), "v".into()))
//!     .wait()
//!     .await?;
//!
//! consumer.assign(&[TopicPartition::new("t", 0)])?;
//! let batch = consumer.poll(Duration::from_millis(100)).await?;
//! assert_eq!(batch.len(), 1);
//! ```

pub mod config;
pub mod consumer;
pub mod log;
pub mod producer;

pub use config::MemoryLogConfig;
pub use consumer::MemoryConsumer;
pub use log::{MemoryLog, StoredEntry};
pub use producer::MemoryProducer;
