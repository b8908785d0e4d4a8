//! Presence: the live participant count and its announcement to every connection
use chrono::Utc;
use tracing::{debug, warn};

use crate::{ConnectionId, ConnectionRegistry, ServerMessage};

/// Outcome of one presence announcement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceReport {
    /// Participant count of each pass, in order
    pub announced: Vec<usize>,
    /// Connections dropped because the announcement could not reach them
    pub evicted: Vec<ConnectionId>,
}

/// Send `participantUpdate` to every registered connection.
///
/// A failed send marks that connection dead. Dead connections are removed only
/// after the pass over the registry is complete, then the smaller count is
/// announced to the survivors. Repeats until a pass has no failures.
pub fn announce_presence(registry: &mut ConnectionRegistry) -> PresenceReport {
    let mut report = PresenceReport::default();

    loop {
        let participants = registry.len();
        let message = ServerMessage::ParticipantUpdate {
            total_participants: participants,
            timestamp: Utc::now(),
        };

        let failed: Vec<ConnectionId> = registry
            .iter()
            .filter_map(|session| match session.send(&message) {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to send participant update to {}: {}", session.id, e);
                    Some(session.id)
                }
            })
            .collect();

        debug!("Broadcast participant update: {} participants", participants);
        report.announced.push(participants);

        if failed.is_empty() {
            return report;
        }

        for id in failed {
            if registry.remove(&id).is_some() {
                report.evicted.push(id);
            }
        }
    }
}
