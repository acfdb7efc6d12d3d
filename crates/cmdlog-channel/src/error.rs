//! Error types for the command channel

use thiserror::Error;

use cmdlog_core::{AckError, AppendCause, LogError};

/// Errors reported by [`CommandChannel`](crate::CommandChannel) operations
///
/// The set is closed so callers can branch on the kind; the original failure
/// text is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The log service did not acknowledge an append
    ///
    /// Displays the cause's message verbatim for runtime-class causes and
    /// `"<kind>: <message>"` otherwise.
    #[error("{cause}")]
    AppendFailed { cause: AppendCause },

    /// A blocking wait was cancelled before an outcome was known
    #[error("{message}")]
    WaitCancelled { message: String },

    #[error("Log client error: {0}")]
    Log(LogError),

    #[error("Command channel is shut down")]
    Closed,
}

impl ChannelError {
    /// Whether this failure came from `interrupt()` or another cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::WaitCancelled { .. })
    }

    /// The original failure text, without any kind prefix
    pub fn message(&self) -> String {
        match self {
            ChannelError::AppendFailed { cause } => cause.message.clone(),
            ChannelError::WaitCancelled { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<LogError> for ChannelError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Wakeup => ChannelError::WaitCancelled {
                message: LogError::Wakeup.to_string(),
            },
            other => ChannelError::Log(other),
        }
    }
}

impl From<AckError> for ChannelError {
    fn from(err: AckError) -> Self {
        match err {
            AckError::Failed(cause) => ChannelError::AppendFailed { cause },
            AckError::Interrupted(message) => ChannelError::WaitCancelled { message },
        }
    }
}

/// Failure reported by a [`CommandExecutor`](crate::CommandExecutor)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Command execution failed: {0}")]
pub struct ExecutionError(pub String);

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why a [`CommandRunner`](crate::CommandRunner) loop ended abnormally
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Runner task failed: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdlog_core::TopicPartition;

    #[test]
    fn test_runtime_cause_keeps_message() {
        let err: ChannelError =
            AckError::Failed(AppendCause::runtime("Runtime", "Send was unsuccessful!")).into();
        assert_eq!(err.to_string(), "Send was unsuccessful!");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_other_cause_gets_kind_prefix() {
        let err: ChannelError = AckError::Failed(AppendCause::other(
            "std::io::Error",
            "Send was unsuccessful because of non runtime error!",
        ))
        .into();
        assert_eq!(
            err.to_string(),
            "std::io::Error: Send was unsuccessful because of non runtime error!"
        );
        assert_eq!(
            err.message(),
            "Send was unsuccessful because of non runtime error!"
        );
    }

    #[test]
    fn test_interrupted_ack_is_cancelled() {
        let err: ChannelError = AckError::Interrupted("InterruptedException".to_string()).into();
        assert_eq!(err.to_string(), "InterruptedException");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_wakeup_converts_to_cancelled() {
        let err: ChannelError = LogError::Wakeup.into();
        assert!(err.is_cancelled());

        let err: ChannelError = LogError::NotAssigned(TopicPartition::new("t", 0)).into();
        assert!(matches!(err, ChannelError::Log(LogError::NotAssigned(_))));
        assert!(err.to_string().contains("t-0"));
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::new("stream already exists");
        assert!(err.to_string().contains("stream already exists"));
    }
}
