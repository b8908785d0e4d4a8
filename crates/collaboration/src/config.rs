use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

use crate::Version;

/// Which ingestion protocol is live. Exactly one runs per process: mixing
/// step batches with whole-document overwrites silently loses edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProtocol {
    /// Step batches gated on base version
    #[default]
    Steps,
    /// Whole-document replacement with fingerprint short-circuit
    Document,
}

impl fmt::Display for SyncProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncProtocol::Steps => f.write_str("steps"),
            SyncProtocol::Document => f.write_str("document"),
        }
    }
}

impl FromStr for SyncProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "steps" => Ok(SyncProtocol::Steps),
            "document" => Ok(SyncProtocol::Document),
            other => Err(format!("unknown protocol '{}', expected 'steps' or 'document'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub protocol: SyncProtocol,
    /// Version of the document before any step is applied
    pub initial_version: Version,
    /// How often the liveness sweeper runs
    pub sweep_interval: Duration,
    /// A connection counts as active if it sent something within this window
    pub activity_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            protocol: SyncProtocol::Steps,
            initial_version: 0,
            sweep_interval: Duration::from_secs(30),
            activity_window: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("Steps".parse::<SyncProtocol>(), Ok(SyncProtocol::Steps));
        assert_eq!("document".parse::<SyncProtocol>(), Ok(SyncProtocol::Document));
        assert!("ot".parse::<SyncProtocol>().is_err());
        assert_eq!(SyncProtocol::Document.to_string(), "document");
    }
}
