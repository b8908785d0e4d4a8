//! Document store: current document, version counter and the append-only log.
//! Only the sync engine mutates it, always under the engine's write lock.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CollaborationError, Document, OriginId, Result, Step, Version};

/// What a log entry recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoggedOperation {
    Step(Step),
    /// Whole-document overwrite from the document protocol
    Replace(Document),
}

impl LoggedOperation {
    pub fn as_step(&self) -> Option<&Step> {
        match self {
            LoggedOperation::Step(step) => Some(step),
            LoggedOperation::Replace(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    pub operation: LoggedOperation,
    pub origin_id: OriginId,
    /// Version after this entry was applied
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

/// Result of a whole-document replacement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Unchanged { version: Version },
    Replaced { version: Version },
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    document: Document,
    version: Version,
    initial_version: Version,
    log: Vec<OperationLogEntry>,
}

impl DocumentStore {
    pub fn new(document: Document, initial_version: Version) -> Self {
        Self {
            document,
            version: initial_version,
            initial_version,
            log: Vec::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn initial_version(&self) -> Version {
        self.initial_version
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn log(&self) -> &[OperationLogEntry] {
        &self.log
    }

    pub fn snapshot(&self) -> (Document, Version) {
        (self.document.clone(), self.version)
    }

    /// Apply `steps` in order. Either every step lands and the version moves by
    /// `steps.len()`, or nothing changes.
    pub fn append(
        &mut self,
        steps: &[Step],
        origin: &OriginId,
        timestamp: DateTime<Utc>,
    ) -> Result<Version> {
        let next = self
            .document
            .apply_all(steps)
            .map_err(|(index, reason)| CollaborationError::OperationApplicationFailure { index, reason })?;

        let base = self.version;
        self.log.extend(steps.iter().enumerate().map(|(i, step)| OperationLogEntry {
            operation: LoggedOperation::Step(step.clone()),
            origin_id: origin.clone(),
            version: base + i as Version + 1,
            timestamp,
        }));
        self.document = next;
        self.version = base + steps.len() as Version;

        Ok(self.version)
    }

    /// Overwrite the whole document unless it fingerprints identical to the current one.
    pub fn replace(
        &mut self,
        document: Document,
        origin: &OriginId,
        timestamp: DateTime<Utc>,
    ) -> ReplaceOutcome {
        if document.fingerprint() == self.document.fingerprint() {
            return ReplaceOutcome::Unchanged {
                version: self.version,
            };
        }

        self.version += 1;
        self.log.push(OperationLogEntry {
            operation: LoggedOperation::Replace(document.clone()),
            origin_id: origin.clone(),
            version: self.version,
            timestamp,
        });
        self.document = document;

        ReplaceOutcome::Replaced {
            version: self.version,
        }
    }

    /// Entries with a version strictly greater than `version`.
    pub fn entries_since(&self, version: Version) -> Result<&[OperationLogEntry]> {
        if version > self.version || version < self.initial_version {
            return Err(CollaborationError::InvalidVersion {
                requested: version,
                current: self.version,
            });
        }
        let start = (version - self.initial_version) as usize;
        Ok(&self.log[start..])
    }
}
