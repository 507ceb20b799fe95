//! Audit Stores
//!
//! Pluggable persistence for audit entries. The SQLite store lives next to
//! the data in `_backstop_audit_log`; the JSONL store (see
//! [`super::audit::JsonlAuditStore`]) appends to a file.

use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use serde_json::Value;
use thiserror::Error;

use super::audit::{AuditAction, AuditLogEntry};
use crate::engine::database::{Database, DatabaseError};

pub const AUDIT_TABLE: &str = "_backstop_audit_log";

/// Limit applied when a query doesn't give one
pub const DEFAULT_AUDIT_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt audit entry: {0}")]
    Corrupt(String),
}

/// Filter criteria for audit queries
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// All entries for one row
    pub fn entity(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT)
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.entity_type.as_ref().map_or(true, |t| *t == entry.entity_type)
            && self.entity_id.as_ref().map_or(true, |id| *id == entry.entity_id)
            && self.action.map_or(true, |a| a == entry.action)
    }
}

/// Append-only audit persistence.
///
/// Implementations must be safe to call from several threads at once and
/// return query results newest first.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError>;

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, AuditError>;

    fn count(&self) -> Result<usize, AuditError>;

    fn list_recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.query(&AuditFilter::recent(limit))
    }
}

/// Audit store backed by a table in the application database
pub struct SqliteAuditStore {
    db: Database,
}

impl SqliteAuditStore {
    /// Open the store, creating the table and its append-only guards if needed
    pub fn new(db: Database) -> Result<Self, AuditError> {
        db.execute_ddl(&format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                userId TEXT NOT NULL,
                userName TEXT NOT NULL,
                action TEXT NOT NULL,
                entityType TEXT NOT NULL,
                entityId TEXT NOT NULL,
                entityData TEXT,
                createdAt TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_entity ON {table} (entityType, entityId);
            CREATE TRIGGER IF NOT EXISTS {table}_no_update BEFORE UPDATE ON {table}
                BEGIN SELECT RAISE(ABORT, 'audit log is append-only'); END;
            CREATE TRIGGER IF NOT EXISTS {table}_no_delete BEFORE DELETE ON {table}
                BEGIN SELECT RAISE(ABORT, 'audit log is append-only'); END;"#,
            table = AUDIT_TABLE
        ))?;
        Ok(Self { db })
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
        Ok(AuditRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            user_name: row.get(2)?,
            action: row.get(3)?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            entity_data: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// Raw column values, decoded outside the rusqlite row callback
struct AuditRow {
    id: String,
    user_id: String,
    user_name: String,
    action: String,
    entity_type: String,
    entity_id: String,
    entity_data: Option<String>,
    created_at: String,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditLogEntry, AuditError> {
        let entity_data = self
            .entity_data
            .map(|s| serde_json::from_str::<Value>(&s))
            .transpose()?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AuditError::Corrupt(format!("bad createdAt {}: {}", self.created_at, e)))?
            .with_timezone(&Utc);

        Ok(AuditLogEntry {
            id: self.id,
            user_id: self.user_id,
            user_name: self.user_name,
            action: self.action.parse()?,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            entity_data,
            created_at,
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, entry: &AuditLogEntry) -> Result<(), AuditError> {
        let entity_data = entry
            .entity_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.db.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, userId, userName, action, entityType, entityId, entityData, createdAt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                AUDIT_TABLE
            ),
            rusqlite::params![
                entry.id,
                entry.user_id,
                entry.user_name,
                entry.action.as_str(),
                entry.entity_type,
                entry.entity_id,
                entity_data,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, AuditError> {
        let mut conditions = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(ref entity_type) = filter.entity_type {
            params.push(entity_type.clone());
            conditions.push(format!("entityType = ?{}", params.len()));
        }
        if let Some(ref entity_id) = filter.entity_id {
            params.push(entity_id.clone());
            conditions.push(format!("entityId = ?{}", params.len()));
        }
        if let Some(action) = filter.action {
            params.push(action.as_str().to_string());
            conditions.push(format!("action = ?{}", params.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT id, userId, userName, action, entityType, entityId, entityData, createdAt
             FROM {AUDIT_TABLE} {where_clause}
             ORDER BY seq DESC LIMIT {}",
            filter.effective_limit()
        );

        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }

    fn count(&self) -> Result<usize, AuditError> {
        let conn = self.db.get_connection()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", AUDIT_TABLE), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::identity::Actor;
    use serde_json::json;

    fn store() -> SqliteAuditStore {
        SqliteAuditStore::new(Database::in_memory().unwrap()).unwrap()
    }

    #[test]
    fn test_newest_first_with_limit() {
        let store = store();
        let actor = Actor::new("u1", "Alice");
        for id in ["S1", "S2", "S3"] {
            store
                .append(&AuditLogEntry::new(&actor, AuditAction::Create, "Seller", id))
                .unwrap();
        }

        let recent = store.list_recent(2).unwrap();
        let ids: Vec<&str> = recent.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["S3", "S2"]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_filters_and_entity_data() {
        let store = store();
        let actor = Actor::system();
        store
            .append(
                &AuditLogEntry::new(&actor, AuditAction::ForceDelete, "Seller", "S1")
                    .with_entity_data(json!({"id": "S1", "bankAccountNumber": "NL01"})),
            )
            .unwrap();
        store
            .append(&AuditLogEntry::new(&actor, AuditAction::Create, "Seller", "S2"))
            .unwrap();

        let history = store.query(&AuditFilter::entity("Seller", "S1")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::ForceDelete);
        assert_eq!(history[0].entity_data.as_ref().unwrap()["bankAccountNumber"], "NL01");

        let creates = store
            .query(&AuditFilter::default().with_action(AuditAction::Create))
            .unwrap();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].entity_id, "S2");
        assert!(creates[0].entity_data.is_none());
    }

    #[test]
    fn test_rows_cannot_be_rewritten() {
        let db = Database::in_memory().unwrap();
        let store = SqliteAuditStore::new(db.clone()).unwrap();
        store
            .append(&AuditLogEntry::new(&Actor::system(), AuditAction::Create, "User", "U1"))
            .unwrap();

        let conn = db.get_connection().unwrap();
        assert!(conn
            .execute(&format!("UPDATE {} SET userId = 'x'", AUDIT_TABLE), [])
            .is_err());
        assert!(conn.execute(&format!("DELETE FROM {}", AUDIT_TABLE), []).is_err());
    }
}
