//! Synchronization engine.
//!
//! The engine owns the document store and the connection registry behind one
//! lock. Every mutation (admission, removal, step batches, whole-document
//! updates, sweeps) holds the write lock for its full check-then-act sequence,
//! so two batches can never both pass the version gate against the same base.
//! Transport sends are non-blocking, so nothing awaits while the lock is held.
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    announce_presence, ClientMessage, ClientStats, CollaborationError, ConnectionId,
    ConnectionRegistry, ConnectionSession, Document, DocumentStore, OperationLogEntry, OriginId,
    ReplaceOutcome, Result, ServerMessage, Step, StepEnvelope, SyncConfig, SyncProtocol,
    Transport, Version,
};

/// What happened to a step batch submitted over a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Accepted { version: Version },
    /// The base version was stale; the sender received a resync
    Resynced { version: Version },
    /// A step failed to apply; nothing changed
    Rejected { version: Version, reason: String },
}

/// Consistent read of the document for inspection endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub doc: Document,
    pub version: Version,
    pub total_participants: usize,
    pub step_history: usize,
}

pub struct SyncEngine {
    config: SyncConfig,
    state: RwLock<EngineState>,
}

struct EngineState {
    store: DocumentStore,
    registry: ConnectionRegistry,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_document(config, Document::default())
    }

    pub fn with_document(config: SyncConfig, document: Document) -> Self {
        let store = DocumentStore::new(document, config.initial_version);
        Self {
            config,
            state: RwLock::new(EngineState {
                store,
                registry: ConnectionRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register a new connection and send it the current document.
    /// The presence announcement is queued behind `init` on the same transport,
    /// so the client always sees its snapshot first.
    pub fn admit(&self, transport: Arc<dyn Transport>) -> Result<ConnectionId> {
        let mut state = self.state.write();
        let (doc, version) = state.store.snapshot();
        let id = ConnectionId::new();
        let session = ConnectionSession::new(id, transport, version);

        session.send(&ServerMessage::Init {
            doc,
            version,
            client_id: id,
            total_participants: state.registry.len() + 1,
        })?;

        state.registry.insert(session);
        info!(
            "Client {} connected at version {}. Total participants: {}",
            id,
            version,
            state.registry.len()
        );
        announce_presence(&mut state.registry);

        Ok(id)
    }

    /// Drop a connection. Returns false (and announces nothing) if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.state.write().evict(vec![id]) > 0
    }

    /// Parse and dispatch one inbound text frame.
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> Result<()> {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(id, message),
            Err(err) => {
                warn!("Dropping malformed message from {}: {}", id, err);
                let mut state = self.state.write();
                state.touch(id)?;
                let mut dead = Vec::new();
                state.reply(
                    id,
                    &ServerMessage::Error {
                        message: err.to_string(),
                    },
                    &mut dead,
                );
                state.evict(dead);
                Err(err)
            }
        }
    }

    pub fn handle_message(&self, id: ConnectionId, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Steps {
                version,
                steps,
                client_id,
                ..
            } => {
                let steps = steps.into_iter().map(|envelope| envelope.step).collect();
                self.receive_steps(id, version, steps, client_id).map(|_| ())
            }

            ClientMessage::DocumentUpdate { doc } => self.update_document(id, doc).map(|_| ()),

            ClientMessage::Ping => {
                let mut state = self.state.write();
                state.touch(id)?;
                let mut dead = Vec::new();
                state.reply(id, &ServerMessage::Pong, &mut dead);
                state.evict(dead);
                Ok(())
            }

            ClientMessage::Pong => {
                self.state.write().touch(id)?;
                debug!("Received pong from {}", id);
                Ok(())
            }
        }
    }

    /// Accept or reject a step batch from connection `id` built against `base`.
    pub fn receive_steps(
        &self,
        id: ConnectionId,
        base: Version,
        steps: Vec<Step>,
        origin: Option<OriginId>,
    ) -> Result<BatchOutcome> {
        let mut state = self.state.write();
        state.touch(id)?;
        let origin = origin.unwrap_or_else(|| OriginId::from(id));
        state.receive_steps(self.config.protocol, id, base, &steps, &origin)
    }

    /// Whole-document replacement from connection `id`.
    pub fn update_document(&self, id: ConnectionId, doc: Document) -> Result<ReplaceOutcome> {
        let mut state = self.state.write();
        state.touch(id)?;
        state.update_document(self.config.protocol, id, doc)
    }

    /// Step batch arriving outside any connection (HTTP). Goes through the same
    /// version gate and broadcasts to every connection.
    pub fn submit_steps(
        &self,
        base: Version,
        steps: Vec<Step>,
        origin: Option<OriginId>,
    ) -> Result<Version> {
        if self.config.protocol != SyncProtocol::Steps {
            return Err(CollaborationError::ProtocolDisabled(
                "step batches are not accepted in document mode".to_string(),
            ));
        }

        let mut state = self.state.write();
        let origin = origin.unwrap_or_else(|| OriginId::from("http"));
        let version = state.commit_steps(base, &steps, &origin)?;
        info!(
            "Applied {} steps from {} over HTTP. New version: {}",
            steps.len(),
            origin,
            version
        );

        if !steps.is_empty() {
            let message = steps_broadcast(&steps, &origin, version);
            let dead = state.broadcast(&message, version, None);
            state.evict(dead);
        }

        Ok(version)
    }

    /// Evict every connection whose transport is no longer open. Announces
    /// presence once for the whole sweep, and not at all if nothing was removed.
    pub fn sweep(&self) -> usize {
        let mut state = self.state.write();
        let dead = state.registry.dead_connections();
        if dead.is_empty() {
            return 0;
        }
        info!("Cleaning up {} dead connections", dead.len());
        state.evict(dead)
    }

    pub fn version(&self) -> Version {
        self.state.read().store.version()
    }

    pub fn participant_count(&self) -> usize {
        self.state.read().registry.len()
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        let state = self.state.read();
        let (doc, version) = state.store.snapshot();
        DocumentSnapshot {
            doc,
            version,
            total_participants: state.registry.len(),
            step_history: state.store.log().len(),
        }
    }

    pub fn entries_since(&self, version: Version) -> Result<Vec<OperationLogEntry>> {
        Ok(self.state.read().store.entries_since(version)?.to_vec())
    }

    pub fn log(&self) -> Vec<OperationLogEntry> {
        self.state.read().store.log().to_vec()
    }

    pub fn acked_version(&self, id: ConnectionId) -> Option<Version> {
        self.state
            .read()
            .registry
            .get(&id)
            .map(|session| session.acked_version)
    }

    pub fn client_stats(&self) -> Vec<ClientStats> {
        self.state.read().registry.stats(self.config.activity_window)
    }
}

impl EngineState {
    fn touch(&mut self, id: ConnectionId) -> Result<()> {
        match self.registry.get_mut(&id) {
            Some(session) => {
                session.touch();
                Ok(())
            }
            None => {
                warn!("Client {} not found", id);
                Err(CollaborationError::ConnectionNotFound(id))
            }
        }
    }

    /// Version gate plus atomic append.
    fn commit_steps(&mut self, base: Version, steps: &[Step], origin: &OriginId) -> Result<Version> {
        let current = self.store.version();
        if base != current {
            return Err(CollaborationError::VersionMismatch {
                expected: current,
                actual: base,
            });
        }
        self.store.append(steps, origin, Utc::now())
    }

    fn receive_steps(
        &mut self,
        protocol: SyncProtocol,
        id: ConnectionId,
        base: Version,
        steps: &[Step],
        origin: &OriginId,
    ) -> Result<BatchOutcome> {
        let mut dead = Vec::new();
        let current = self.store.version();

        if protocol != SyncProtocol::Steps {
            let err = CollaborationError::ProtocolDisabled(
                "step batches are not accepted in document mode".to_string(),
            );
            let ack = ServerMessage::StepAck {
                success: false,
                steps_sent: 0,
                current_version: current,
                error: Some(err.to_string()),
            };
            self.reply(id, &ack, &mut dead);
            self.evict(dead);
            return Err(err);
        }

        let outcome = match self.commit_steps(base, steps, origin) {
            Ok(version) => {
                info!(
                    "Applied {} steps from client {} ({}). New version: {}",
                    steps.len(),
                    id,
                    origin,
                    version
                );
                let ack = ServerMessage::StepAck {
                    success: true,
                    steps_sent: steps.len(),
                    current_version: version,
                    error: None,
                };
                if self.reply(id, &ack, &mut dead) {
                    if let Some(session) = self.registry.get_mut(&id) {
                        session.acked_version = version;
                    }
                }
                if !steps.is_empty() {
                    let message = steps_broadcast(steps, origin, version);
                    dead.extend(self.broadcast(&message, version, Some(id)));
                }
                BatchOutcome::Accepted { version }
            }

            Err(CollaborationError::VersionMismatch { expected, actual }) => {
                warn!(
                    "Version mismatch. Client {}: {}, Server: {}",
                    id, actual, expected
                );
                let (doc, version) = self.store.snapshot();
                let missed = self
                    .store
                    .entries_since(actual)
                    .map(StepEnvelope::from_entries)
                    .unwrap_or_default();
                let resync = ServerMessage::Resync {
                    doc,
                    version,
                    steps: missed,
                };
                if self.reply(id, &resync, &mut dead) {
                    if let Some(session) = self.registry.get_mut(&id) {
                        session.acked_version = version;
                    }
                }
                BatchOutcome::Resynced { version }
            }

            Err(err) => {
                warn!("Rejected batch from client {}: {}", id, err);
                let reason = err.to_string();
                let ack = ServerMessage::StepAck {
                    success: false,
                    steps_sent: 0,
                    current_version: current,
                    error: Some(reason.clone()),
                };
                self.reply(id, &ack, &mut dead);
                BatchOutcome::Rejected {
                    version: current,
                    reason,
                }
            }
        };

        self.evict(dead);
        Ok(outcome)
    }

    fn update_document(
        &mut self,
        protocol: SyncProtocol,
        id: ConnectionId,
        doc: Document,
    ) -> Result<ReplaceOutcome> {
        let mut dead = Vec::new();

        if protocol != SyncProtocol::Document {
            let err = CollaborationError::ProtocolDisabled(
                "whole-document updates are not accepted in steps mode".to_string(),
            );
            let ack = ServerMessage::DocumentUpdateAck {
                success: false,
                version: None,
                no_changes: None,
                error: Some(err.to_string()),
            };
            self.reply(id, &ack, &mut dead);
            self.evict(dead);
            return Err(err);
        }

        let outcome = self.store.replace(doc, &OriginId::from(id), Utc::now());
        match outcome {
            ReplaceOutcome::Unchanged { version } => {
                debug!("No changes detected from client {}", id);
                let ack = ServerMessage::DocumentUpdateAck {
                    success: true,
                    version: Some(version),
                    no_changes: Some(true),
                    error: None,
                };
                self.reply(id, &ack, &mut dead);
            }

            ReplaceOutcome::Replaced { version } => {
                info!("Document updated by client {}. New version: {}", id, version);
                let ack = ServerMessage::DocumentUpdateAck {
                    success: true,
                    version: Some(version),
                    no_changes: None,
                    error: None,
                };
                if self.reply(id, &ack, &mut dead) {
                    if let Some(session) = self.registry.get_mut(&id) {
                        session.acked_version = version;
                    }
                }
                let message = ServerMessage::DocumentUpdate {
                    doc: self.store.document().clone(),
                    version,
                    timestamp: Utc::now(),
                    updated_by: id,
                };
                dead.extend(self.broadcast(&message, version, Some(id)));
            }
        }

        self.evict(dead);
        Ok(outcome)
    }

    /// Send one message to `id`. A failed send lands in `dead`; removal is the caller's job.
    fn reply(&self, id: ConnectionId, message: &ServerMessage, dead: &mut Vec<ConnectionId>) -> bool {
        let Some(session) = self.registry.get(&id) else {
            return false;
        };
        match session.send(message) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send to client {}: {}", id, e);
                dead.push(id);
                false
            }
        }
    }

    /// Deliver `message` to every connection but `exclude`, in registry order.
    /// Every recipient is attempted; the ones that failed are returned.
    fn broadcast(
        &mut self,
        message: &ServerMessage,
        version: Version,
        exclude: Option<ConnectionId>,
    ) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        let mut delivered = 0;

        for session in self.registry.iter_mut() {
            if Some(session.id) == exclude {
                continue;
            }
            match session.send(message) {
                Ok(()) => {
                    session.acked_version = version;
                    delivered += 1;
                }
                Err(e) => {
                    error!("Failed to broadcast to client {}: {}", session.id, e);
                    failed.push(session.id);
                }
            }
        }

        debug!("Broadcast version {} to {} clients", version, delivered);
        failed
    }

    /// Remove `ids` and, if anything was actually removed, announce presence once.
    /// Returns every connection dropped, including ones the announcement could not reach.
    fn evict(&mut self, ids: Vec<ConnectionId>) -> usize {
        let mut removed = 0;
        for id in ids {
            if self.registry.remove(&id).is_some() {
                info!(
                    "Client {} disconnected. Total participants: {}",
                    id,
                    self.registry.len()
                );
                removed += 1;
            }
        }
        if removed > 0 {
            let report = announce_presence(&mut self.registry);
            for id in &report.evicted {
                info!(
                    "Client {} disconnected during presence update. Total participants: {}",
                    id,
                    self.registry.len()
                );
            }
            removed += report.evicted.len();
        }
        removed
    }
}

fn steps_broadcast(steps: &[Step], origin: &OriginId, version: Version) -> ServerMessage {
    ServerMessage::Steps {
        version,
        steps: steps
            .iter()
            .cloned()
            .map(|step| StepEnvelope {
                step,
                client_id: Some(origin.clone()),
            })
            .collect(),
        timestamp: Utc::now(),
    }
}
