//! Audit log entries and the line-delimited JSON store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

use super::store::{AuditError, AuditFilter, AuditStore};
use crate::engine::identity::Actor;

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    SoftDelete,
    ForceDelete,
    Restore,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::SoftDelete => "SOFT_DELETE",
            AuditAction::ForceDelete => "FORCE_DELETE",
            AuditAction::Restore => "RESTORE",
        }
    }

    /// Whether `entity_data` holds the row as it was before the write
    pub fn records_pre_state(&self) -> bool {
        matches!(
            self,
            AuditAction::Delete | AuditAction::SoftDelete | AuditAction::ForceDelete
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "SOFT_DELETE" => Ok(AuditAction::SoftDelete),
            "FORCE_DELETE" => Ok(AuditAction::ForceDelete),
            "RESTORE" => Ok(AuditAction::Restore),
            other => Err(AuditError::Corrupt(format!("unknown audit action {}", other))),
        }
    }
}

/// A single audit entry. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,

    /// Post-state for creates, updates and restores; pre-state for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_data: Option<Value>,

    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(actor: &Actor, action: AuditAction, entity_type: &str, entity_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: actor.id.clone(),
            user_name: actor.name.clone(),
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            entity_data: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_entity_data(mut self, data: Value) -> Self {
        self.entity_data = Some(data);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Append-only JSONL audit log, one entry per line
pub struct JsonlAuditStore {
    log_path: PathBuf,
    // Appends from concurrent recorders must not interleave
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(log_path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            log_path: log_path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    fn read_all(&self) -> Result<Vec<AuditLogEntry>, AuditError> {
        if !self.log_path.exists() {
            return Ok(vec![]);
        }

        let reader = BufReader::new(fs::File::open(&self.log_path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AuditError::Corrupt("audit log lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, AuditError> {
        let entries = self.read_all()?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.effective_limit())
            .collect())
    }

    fn count(&self) -> Result<usize, AuditError> {
        Ok(self.read_all()?.len())
    }
}
