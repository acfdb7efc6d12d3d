//! Configuration for the in-memory log

use serde::{Deserialize, Serialize};

/// Configuration for a [`MemoryLog`](crate::MemoryLog)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLogConfig {
    /// Partition count for topics created implicitly by an append
    pub default_partitions: u32,
    /// Upper bound on the records a single poll returns
    pub max_poll_records: usize,
}

impl Default for MemoryLogConfig {
    fn default() -> Self {
        Self {
            default_partitions: 1,
            max_poll_records: 500,
        }
    }
}

impl MemoryLogConfig {
    /// Set the partition count for implicitly created topics
    pub fn with_default_partitions(mut self, partitions: u32) -> Self {
        self.default_partitions = partitions.max(1);
        self
    }

    /// Set the per-poll record limit
    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }
}
