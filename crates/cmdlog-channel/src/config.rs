//! Configuration for the command channel and runner

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Topic used when none is configured
pub const DEFAULT_COMMAND_TOPIC: &str = "_cmdlog_command_topic";

/// Configuration for a [`CommandChannel`](crate::CommandChannel) and its runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name of the command topic; partition 0 of it carries every command
    pub topic: String,
    /// Timeout of each live-tail poll
    #[serde(with = "duration_millis")]
    pub poll_timeout: Duration,
    /// Timeout of each poll during replay; one empty poll ends the replay
    #[serde(with = "duration_millis")]
    pub replay_poll_timeout: Duration,
    /// Pause after a log client failure before the runner polls again
    #[serde(with = "duration_millis")]
    pub error_backoff: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_COMMAND_TOPIC.to_string(),
            poll_timeout: Duration::from_millis(500),
            replay_poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_millis(250),
        }
    }
}

impl ChannelConfig {
    /// Defaults, overridden by `CMDLOG_*` environment variables where set
    ///
    /// Recognized: `CMDLOG_COMMAND_TOPIC`, `CMDLOG_POLL_TIMEOUT_MS`,
    /// `CMDLOG_REPLAY_POLL_TIMEOUT_MS`, `CMDLOG_ERROR_BACKOFF_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(topic) = lookup("CMDLOG_COMMAND_TOPIC").filter(|t| !t.is_empty()) {
            config.topic = topic;
        }
        let millis = |name: &str, fallback: Duration| match lookup(name) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    warn!(variable = name, value = %raw, "Ignoring non-numeric duration");
                    fallback
                }
            },
            None => fallback,
        };
        config.poll_timeout = millis("CMDLOG_POLL_TIMEOUT_MS", config.poll_timeout);
        config.replay_poll_timeout =
            millis("CMDLOG_REPLAY_POLL_TIMEOUT_MS", config.replay_poll_timeout);
        config.error_backoff = millis("CMDLOG_ERROR_BACKOFF_MS", config.error_backoff);
        config
    }

    /// Set the command topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the live-tail poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the replay poll timeout
    pub fn with_replay_poll_timeout(mut self, timeout: Duration) -> Self {
        self.replay_poll_timeout = timeout;
        self
    }

    /// Set the runner's backoff after log client failures
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// The subset of settings the runner loop needs
    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            poll_timeout: self.poll_timeout,
            replay_poll_timeout: self.replay_poll_timeout,
            error_backoff: self.error_backoff,
        }
    }
}

/// Timing of a [`CommandRunner`](crate::CommandRunner) loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub poll_timeout: Duration,
    pub replay_poll_timeout: Duration,
    pub error_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        ChannelConfig::default().runner()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
