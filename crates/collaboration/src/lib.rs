//! Server-side document synchronization engine.
//!
//! One shared document, a versioned append-only step log, optimistic
//! base-version gating for incoming batches, fan-out to peers, and the
//! connection/presence lifecycle around it.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod config;
pub use config::*;

mod store;
pub use store::*;

mod registry;
pub use registry::*;

mod protocol;
pub use protocol::*;

mod presence;
pub use presence::*;

mod sync;
pub use sync::*;

mod sweeper;
pub use sweeper::*;

pub use document::{Document, Node, Step, StepError};

/// Document version. Equals the initial version plus the number of log entries.
pub type Version = u64;

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("version mismatch: batch based on {actual}, current version is {expected}")]
    VersionMismatch { expected: Version, actual: Version },

    #[error("step {index} failed to apply: {reason}")]
    OperationApplicationFailure { index: usize, reason: StepError },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("invalid version {requested}: current version is {current}")]
    InvalidVersion { requested: Version, current: Version },

    #[error("protocol disabled: {0}")]
    ProtocolDisabled(String),
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// Identifier handed to each admitted connection (one per socket, so every tab is distinct)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author tag recorded with every log entry. Editors send either numeric or
/// string client ids, and peers get back whatever shape was sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OriginId {
    Number(i64),
    Text(String),
}

impl From<ConnectionId> for OriginId {
    fn from(id: ConnectionId) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<&str> for OriginId {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginId::Number(n) => write!(f, "{}", n),
            OriginId::Text(s) => f.write_str(s),
        }
    }
}
