//! What a restore did

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRestoreStats {
    pub entity: String,
    pub inserted: usize,
    pub replaced: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub schema_version: u32,
    pub snapshot_created_at: DateTime<Utc>,
    /// One entry per entity, in the order the entities were written
    pub entities: Vec<EntityRestoreStats>,
    /// Deferred foreign-key fields filled in by the second pass
    pub patched_fields: usize,
    pub duration_ms: u64,
}

impl RestoreReport {
    pub fn rows_written(&self) -> usize {
        self.entities.iter().map(|e| e.inserted + e.replaced).sum()
    }

    pub fn write_order(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.entity.as_str()).collect()
    }

    pub fn stats(&self, entity: &str) -> Option<&EntityRestoreStats> {
        self.entities.iter().find(|e| e.entity == entity)
    }
}
