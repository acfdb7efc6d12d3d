//! Error types for the cmdlog core

use thiserror::Error;

use crate::record::TopicPartition;

/// Errors surfaced by a log client (consumer side)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// A blocking call was aborted by `wakeup()`
    #[error("Consumer wakeup interrupted a blocking call")]
    Wakeup,

    #[error("Log client is closed")]
    Closed,

    #[error("Partition {0} is not assigned to this consumer")]
    NotAssigned(TopicPartition),

    #[error("Unknown topic or partition: {0}")]
    UnknownPartition(TopicPartition),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Log I/O error: {0}")]
    Io(String),
}

/// Errors raised while encoding or decoding log entries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            CodecError::Deserialization(err.to_string())
        } else {
            CodecError::Serialization(err.to_string())
        }
    }
}

impl From<postcard::Error> for CodecError {
    fn from(err: postcard::Error) -> Self {
        use postcard::Error as E;

        match err {
            E::SerializeBufferFull | E::SerializeSeqLengthUnknown | E::SerdeSerCustom => {
                CodecError::Serialization(err.to_string())
            }
            _ => CodecError::Deserialization(err.to_string()),
        }
    }
}

/// Errors parsing the textual form of a [`CommandId`](crate::CommandId)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandIdError {
    #[error("Malformed command id '{0}': expected kind/entity/action")]
    Malformed(String),

    #[error("Unknown command kind: {0}")]
    UnknownKind(String),

    #[error("Unknown command action: {0}")]
    UnknownAction(String),

    #[error("Entity name must be non-empty and must not contain '/': {0:?}")]
    InvalidEntity(String),
}
