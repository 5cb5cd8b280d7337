//! Error taxonomy for the list store, the command channel and the directory.
//!
//! Store and channel errors are propagated unchanged; the directory wraps them
//! with an [`OpContext`] naming the operation and target player.

use shared::{CommandKind, ListKind};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reading or writing a list file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt list file {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },
}

/// Failures delivering a command line to a server process.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("server is not running")]
    NotRunning,

    /// The command may or may not have been applied.
    #[error("no response within {window:?}")]
    Timeout { window: Duration },

    #[error("console pipe failed: {0}")]
    Process(String),
}

/// Why a command's effect could not be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbiguityReason {
    Timeout(Duration),
    Malformed(Vec<String>),
    Unrecognized(Vec<String>),
}

impl fmt::Display for AmbiguityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbiguityReason::Timeout(window) => write!(f, "no response within {:?}", window),
            AmbiguityReason::Malformed(lines) => {
                write!(f, "server rejected the command: {}", lines.join(" | "))
            }
            AmbiguityReason::Unrecognized(lines) if lines.is_empty() => {
                f.write_str("server response was empty")
            }
            AmbiguityReason::Unrecognized(lines) => {
                write!(f, "unrecognised response: {}", lines.join(" | "))
            }
        }
    }
}

/// What the directory was doing when an error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    List(ListKind),
    Mutate(CommandKind),
    Reconcile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    pub server_id: String,
    pub operation: Operation,
    pub target: Option<String>,
}

impl OpContext {
    pub fn list(server_id: &str, kind: ListKind) -> Self {
        Self {
            server_id: server_id.to_string(),
            operation: Operation::List(kind),
            target: None,
        }
    }

    pub fn mutate(server_id: &str, kind: CommandKind, target: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            operation: Operation::Mutate(kind),
            target: Some(target.to_string()),
        }
    }

    pub fn reconcile(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            operation: Operation::Reconcile,
            target: None,
        }
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.server_id)?;
        match &self.operation {
            Operation::List(kind) => write!(f, "list {}", kind)?,
            Operation::Mutate(kind) => write!(f, "{}", kind)?,
            Operation::Reconcile => f.write_str("reconcile")?,
        }
        if let Some(target) = &self.target {
            write!(f, " {}", target)?;
        }
        Ok(())
    }
}

/// Everything a directory call can fail with.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{context}: {source}")]
    Store {
        context: OpContext,
        #[source]
        source: StoreError,
    },

    /// Kick has no file-side equivalent, so it needs a live server.
    #[error("{context}: server is not running")]
    NotRunning { context: OpContext },

    #[error("{context}: outcome unknown ({reason}); re-read the list before retrying")]
    Ambiguous {
        context: OpContext,
        reason: AmbiguityReason,
    },

    #[error("{context}: {message}")]
    NotFound { context: OpContext, message: String },

    #[error("{context}: {source}")]
    Channel {
        context: OpContext,
        #[source]
        source: ChannelError,
    },

    #[error("{context}: {message}")]
    InvalidArgument { context: OpContext, message: String },

    #[error("unknown server {0}")]
    UnknownServer(String),
}

impl DirectoryError {
    /// Stable label for the UI layer
    pub fn category(&self) -> &'static str {
        match self {
            Self::Store {
                source: StoreError::Io { .. },
                ..
            } => "io",
            Self::Store {
                source: StoreError::Format { .. },
                ..
            } => "format",
            Self::NotRunning { .. } => "not_running",
            Self::Ambiguous { .. } => "ambiguous",
            Self::NotFound { .. } => "not_found",
            Self::Channel { .. } => "process",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::UnknownServer(_) => "unknown_server",
        }
    }

    /// True when the caller should re-read before retrying
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// Maps a channel failure onto the directory taxonomy.
    pub(crate) fn from_channel(context: OpContext, err: ChannelError) -> Self {
        match err {
            ChannelError::NotRunning => Self::NotRunning { context },
            ChannelError::Timeout { window } => Self::Ambiguous {
                context,
                reason: AmbiguityReason::Timeout(window),
            },
            other => Self::Channel {
                context,
                source: other,
            },
        }
    }
}
