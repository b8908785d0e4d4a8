//! Wire messages exchanged over the persistent connection.
//! JSON envelopes discriminated by `type`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    CollaborationError, ConnectionId, Document, OperationLogEntry, OriginId, Result, Step,
    Version,
};

/// A step together with the client that authored it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEnvelope {
    pub step: Step,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<OriginId>,
}

impl StepEnvelope {
    /// Envelopes for the step entries of `entries`; replacement entries have no step form.
    pub fn from_entries(entries: &[OperationLogEntry]) -> Vec<StepEnvelope> {
        entries
            .iter()
            .filter_map(|entry| {
                entry.operation.as_step().map(|step| StepEnvelope {
                    step: step.clone(),
                    client_id: Some(entry.origin_id.clone()),
                })
            })
            .collect()
    }
}

/// Client -> server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Step batch built against `version`
    Steps {
        version: Version,
        steps: Vec<StepEnvelope>,
        #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
        client_id: Option<OriginId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Whole-document replacement
    DocumentUpdate { doc: Document },

    Ping,

    Pong,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CollaborationError::MalformedMessage(e.to_string()))
    }
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// First message on every connection
    #[serde(rename_all = "camelCase")]
    Init {
        doc: Document,
        version: Version,
        client_id: ConnectionId,
        total_participants: usize,
    },

    #[serde(rename_all = "camelCase")]
    StepAck {
        success: bool,
        steps_sent: usize,
        current_version: Version,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Accepted steps fanned out to peers; `version` is the version after the last step
    Steps {
        version: Version,
        steps: Vec<StepEnvelope>,
        timestamp: DateTime<Utc>,
    },

    /// Sent instead of applying a batch built on a stale version. `steps` holds
    /// what the client missed when its base version is still in the log.
    Resync {
        doc: Document,
        version: Version,
        steps: Vec<StepEnvelope>,
    },

    #[serde(rename_all = "camelCase")]
    DocumentUpdate {
        doc: Document,
        version: Version,
        timestamp: DateTime<Utc>,
        updated_by: ConnectionId,
    },

    #[serde(rename_all = "camelCase")]
    DocumentUpdateAck {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        no_changes: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ParticipantUpdate {
        total_participants: usize,
        timestamp: DateTime<Utc>,
    },

    Pong,

    Error { message: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CollaborationError::MalformedMessage(e.to_string()))
    }
}
