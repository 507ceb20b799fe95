//! Snapshot Module
//!
//! The versioned, portable backup artifact and the writer that produces it.
//!
//! An artifact is a single UTF-8 JSON document:
//!
//! ```text
//! {
//!   "schemaVersion": 1,
//!   "createdAt": "2026-10-16T02:00:00Z",
//!   "entities": { "Event": [ { "id": "E1", "sellerId": "S1", ... } ], ... }
//! }
//! ```
//!
//! Entities are keyed by name in sorted order and each record lists its
//! fields in the entity's column order, so two artifacts of the same store
//! diff cleanly.

pub mod writer;

pub use writer::SnapshotWriter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::engine::adapter::Record;

/// Artifact format version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Versions the restore engine accepts
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot incomplete: reading {entity} failed: {reason}")]
    Incomplete { entity: String, reason: String },
    #[error("Failed to encode snapshot: {0}")]
    Encode(serde_json::Error),
    #[error("Failed to decode snapshot: {0}")]
    Decode(serde_json::Error),
}

/// Who asked for a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupKind {
    Manual,
    Automatic,
}

impl BackupKind {
    pub fn slug(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Automatic => "auto",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "manual" => Some(BackupKind::Manual),
            "auto" => Some(BackupKind::Automatic),
            _ => None,
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Manual => write!(f, "MANUAL"),
            BackupKind::Automatic => write!(f, "AUTOMATIC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub entities: BTreeMap<String, Vec<Record>>,
}

/// Top-level facts about a snapshot, without its rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub entity_counts: BTreeMap<String, usize>,
}

impl Snapshot {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            created_at,
            entities: BTreeMap::new(),
        }
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            schema_version: self.schema_version,
            created_at: self.created_at,
            entity_counts: self
                .entities
                .iter()
                .map(|(name, rows)| (name.clone(), rows.len()))
                .collect(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec_pretty(self).map_err(SnapshotError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(SnapshotError::Decode)
    }
}
