//! Command identifiers and payloads
//!
//! A [`CommandId`] names the resource a command touches and what it does to
//! it. The same id may appear many times in the log; every occurrence is a
//! separate command.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommandIdError;

/// Kind of resource a command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Stream,
    Table,
    Topic,
    Terminate,
    Cluster,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Stream => "stream",
            CommandKind::Table => "table",
            CommandKind::Topic => "topic",
            CommandKind::Terminate => "terminate",
            CommandKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CommandIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(CommandKind::Stream),
            "table" => Ok(CommandKind::Table),
            "topic" => Ok(CommandKind::Topic),
            "terminate" => Ok(CommandKind::Terminate),
            "cluster" => Ok(CommandKind::Cluster),
            _ => Err(CommandIdError::UnknownKind(s.to_string())),
        }
    }
}

/// What a command does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Create,
    Drop,
    Execute,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::Create => "create",
            CommandAction::Drop => "drop",
            CommandAction::Execute => "execute",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandAction {
    type Err = CommandIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(CommandAction::Create),
            "drop" => Ok(CommandAction::Drop),
            "execute" => Ok(CommandAction::Execute),
            _ => Err(CommandIdError::UnknownAction(s.to_string())),
        }
    }
}

/// Identity key of a command log entry
///
/// Ordered by kind, then entity, then action. The textual form is
/// `kind/entity/action`, e.g. `stream/pageviews/create`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCommandId")]
pub struct CommandId {
    kind: CommandKind,
    entity: String,
    action: CommandAction,
}

/// Wire shape of [`CommandId`] before the entity is checked
#[derive(Deserialize)]
struct RawCommandId {
    kind: CommandKind,
    entity: String,
    action: CommandAction,
}

impl TryFrom<RawCommandId> for CommandId {
    type Error = CommandIdError;

    fn try_from(raw: RawCommandId) -> Result<Self, Self::Error> {
        CommandId::new(raw.kind, raw.entity, raw.action)
    }
}

impl CommandId {
    /// Create a command id
    ///
    /// # Errors
    ///
    /// Returns [`CommandIdError::InvalidEntity`] if the entity is empty or
    /// contains the `/` separator.
    pub fn new(
        kind: CommandKind,
        entity: impl Into<String>,
        action: CommandAction,
    ) -> Result<Self, CommandIdError> {
        let entity = entity.into();
        if entity.is_empty() || entity.contains('/') {
            return Err(CommandIdError::InvalidEntity(entity));
        }
        Ok(Self {
            kind,
            entity,
            action,
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn action(&self) -> CommandAction {
        self.action
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.entity, self.action)
    }
}

impl FromStr for CommandId {
    type Err = CommandIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(entity), Some(action), None) => {
                CommandId::new(kind.parse()?, entity, action.parse()?)
            }
            _ => Err(CommandIdError::Malformed(s.to_string())),
        }
    }
}

/// The payload of a command log entry
///
/// The statement text is never interpreted here; the executor owns its
/// meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    statement: String,
    #[serde(default)]
    overwrite_properties: BTreeMap<String, String>,
}

impl Command {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            overwrite_properties: BTreeMap::new(),
        }
    }

    /// Attach a property override that applies when this command executes
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overwrite_properties.insert(key.into(), value.into());
        self
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn overwrite_properties(&self) -> &BTreeMap<String, String> {
        &self.overwrite_properties
    }
}

/// A command that survived consumption and is ready for execution
///
/// Equality is structural over all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueuedCommand {
    pub command_id: CommandId,
    pub command: Command,
    /// Partition offset the command was read from, if it came from the log
    pub sequence: Option<u64>,
}

impl QueuedCommand {
    pub fn new(command_id: CommandId, command: Command) -> Self {
        Self {
            command_id,
            command,
            sequence: None,
        }
    }

    /// Create a queued command read from the given partition offset
    pub fn at_offset(command_id: CommandId, command: Command, offset: u64) -> Self {
        Self {
            command_id,
            command,
            sequence: Some(offset),
        }
    }
}
