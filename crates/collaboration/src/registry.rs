//! Connection registry: live transport handles plus per-connection bookkeeping.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{CollaborationError, ConnectionId, Result, ServerMessage, Version};

/// Outbound half of a client connection.
///
/// `send` must not block: the engine calls it while holding its write lock.
pub trait Transport: Send + Sync {
    fn send(&self, message: &ServerMessage) -> Result<()>;

    /// False once the peer is gone; the sweeper evicts such connections.
    fn is_open(&self) -> bool;
}

/// Transport backed by an unbounded channel drained by the socket writer task.
/// The channel closes when that task exits, which is how a dead socket shows up here.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &ServerMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|e| CollaborationError::TransportError(e.to_string()))
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

pub struct ConnectionSession {
    pub id: ConnectionId,
    transport: Arc<dyn Transport>,
    /// Last version this connection is known to have received
    pub acked_version: Version,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, transport: Arc<dyn Transport>, version: Version) -> Self {
        let now = Utc::now();
        Self {
            id,
            transport,
            acked_version: version,
            connected_at: now,
            last_activity_at: now,
        }
    }

    pub fn send(&self, message: &ServerMessage) -> Result<()> {
        self.transport.send(message)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn stats(&self, now: DateTime<Utc>, activity_window: Duration) -> ClientStats {
        let idle = (now - self.last_activity_at).to_std().unwrap_or_default();
        ClientStats {
            id: self.id,
            connection_time: self.connected_at,
            version: self.acked_version,
            last_activity: self.last_activity_at,
            is_active: idle < activity_window,
            connection_state: if self.is_open() {
                ConnectionState::Open
            } else {
                ConnectionState::Closed
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Per-connection view served by the inspection endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub id: ConnectionId,
    pub connection_time: DateTime<Utc>,
    pub version: Version,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub connection_state: ConnectionState,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<ConnectionId, ConnectionSession>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: ConnectionSession) {
        self.sessions.insert(session.id, session);
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<ConnectionSession> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut ConnectionSession> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionSession> {
        self.sessions.values_mut()
    }

    /// Connections whose transport no longer reports open. Collected first so
    /// callers never remove while iterating.
    pub fn dead_connections(&self) -> Vec<ConnectionId> {
        self.sessions
            .values()
            .filter(|session| !session.is_open())
            .map(|session| session.id)
            .collect()
    }

    pub fn stats(&self, activity_window: Duration) -> Vec<ClientStats> {
        let now = Utc::now();
        let mut stats: Vec<_> = self
            .sessions
            .values()
            .map(|session| session.stats(now, activity_window))
            .collect();
        stats.sort_by_key(|s| s.connection_time);
        stats
    }
}
