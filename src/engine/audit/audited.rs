//! Audited Repository
//!
//! Mutating data access for any registered entity, where every committed
//! call writes exactly one audit entry. Deletes carry the row's pre-state;
//! creates, updates and undeletes the post-state. A write that fails or rolls
//! back is never audited.
//!
//! Connections are released before the recorder runs, so an audit store that
//! shares the application pool can always get one.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::audit::AuditAction;
use super::recorder::{AuditRecorder, AuditWarning};
use crate::engine::adapter::value::display_key;
use crate::engine::adapter::{AdapterError, AdapterResult, AdapterSet, EntityAdapter, Record};
use crate::engine::database::{Database, DatabaseError};
use crate::engine::identity::Actor;
use crate::engine::schema::SOFT_DELETE_COLUMN;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },
    #[error("Update of {entity} {id} has no fields")]
    EmptyUpdate { entity: String, id: String },
    #[error("{0} does not support soft delete")]
    SoftDeleteUnsupported(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Result of a mutation plus any audit warning it produced
#[derive(Debug, Clone)]
pub struct Audited<T> {
    pub value: T,
    pub warning: Option<AuditWarning>,
}

impl<T> Audited<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

#[derive(Clone)]
pub struct AuditedRepository {
    db: Database,
    adapters: Arc<AdapterSet>,
    recorder: AuditRecorder,
}

impl AuditedRepository {
    pub fn new(db: Database, adapters: Arc<AdapterSet>, recorder: AuditRecorder) -> Self {
        Self {
            db,
            adapters,
            recorder,
        }
    }

    pub fn find(&self, entity: &str, id: &Value) -> Result<Option<Record>, RepositoryError> {
        let adapter = self.adapters.get(entity)?;
        let conn = self.db.get_connection()?;
        Ok(adapter.find(&conn, id)?)
    }

    pub fn list(&self, entity: &str) -> Result<Vec<Record>, RepositoryError> {
        let adapter = self.adapters.get(entity)?;
        let conn = self.db.get_connection()?;
        Ok(adapter.read_all(&conn)?)
    }

    pub fn create(
        &self,
        actor: &Actor,
        entity: &str,
        record: Record,
    ) -> Result<Audited<Record>, RepositoryError> {
        let pk = &self.adapters.get(entity)?.descriptor().primary_key;
        let id = record.get(pk).cloned().unwrap_or(Value::Null);
        self.mutate(actor, AuditAction::Create, entity, &id, |adapter, conn| {
            adapter.insert(conn, &record)
        })
    }

    pub fn update(
        &self,
        actor: &Actor,
        entity: &str,
        id: &Value,
        fields: Record,
    ) -> Result<Audited<Record>, RepositoryError> {
        if fields.is_empty() {
            return Err(RepositoryError::EmptyUpdate {
                entity: entity.to_string(),
                id: display_key(id),
            });
        }
        self.mutate(actor, AuditAction::Update, entity, id, |adapter, conn| {
            adapter.patch(conn, id, &fields).map(|_| ())
        })
    }

    /// Hard delete
    pub fn delete(
        &self,
        actor: &Actor,
        entity: &str,
        id: &Value,
    ) -> Result<Audited<Record>, RepositoryError> {
        self.mutate(actor, AuditAction::Delete, entity, id, |adapter, conn| {
            adapter.delete(conn, id).map(|_| ())
        })
    }

    /// Hard delete that bypasses soft delete on entities supporting it
    pub fn force_delete(
        &self,
        actor: &Actor,
        entity: &str,
        id: &Value,
    ) -> Result<Audited<Record>, RepositoryError> {
        self.require_soft_delete(entity)?;
        self.mutate(actor, AuditAction::ForceDelete, entity, id, |adapter, conn| {
            adapter.delete(conn, id).map(|_| ())
        })
    }

    /// Mark a row deleted by stamping its soft-delete column
    pub fn soft_delete(
        &self,
        actor: &Actor,
        entity: &str,
        id: &Value,
    ) -> Result<Audited<Record>, RepositoryError> {
        self.require_soft_delete(entity)?;
        let stamp = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        self.set_deleted_at(actor, AuditAction::SoftDelete, entity, id, stamp)
    }

    /// Clear a row's soft-delete stamp
    pub fn restore_row(
        &self,
        actor: &Actor,
        entity: &str,
        id: &Value,
    ) -> Result<Audited<Record>, RepositoryError> {
        self.require_soft_delete(entity)?;
        self.set_deleted_at(actor, AuditAction::Restore, entity, id, Value::Null)
    }

    fn set_deleted_at(
        &self,
        actor: &Actor,
        action: AuditAction,
        entity: &str,
        id: &Value,
        value: Value,
    ) -> Result<Audited<Record>, RepositoryError> {
        let mut fields = Record::new();
        fields.insert(SOFT_DELETE_COLUMN.to_string(), value);
        self.mutate(actor, action, entity, id, |adapter, conn| {
            adapter.patch(conn, id, &fields).map(|_| ())
        })
    }

    /// Read the pre-state, write and read the post-state in one immediate
    /// transaction. The entry is recorded only after the commit, with the
    /// pre-state for deletes and the post-state otherwise.
    fn mutate<F>(
        &self,
        actor: &Actor,
        action: AuditAction,
        entity: &str,
        id: &Value,
        write: F,
    ) -> Result<Audited<Record>, RepositoryError>
    where
        F: FnOnce(&dyn EntityAdapter, &Connection) -> AdapterResult<()>,
    {
        let adapter = self.adapters.get(entity)?;

        let (before, after) = {
            let mut conn = self.db.get_connection()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(DatabaseError::from)?;

            // Dropping the transaction on any early return rolls it back
            let before = adapter.find(&tx, id)?;
            if before.is_none() && action != AuditAction::Create {
                return Err(not_found(entity, id));
            }
            write(adapter, &tx)?;
            let after = adapter.find(&tx, id)?;
            tx.commit().map_err(DatabaseError::from)?;
            (before, after)
        };

        let state = if action.records_pre_state() { before } else { after };
        let state = state.ok_or_else(|| not_found(entity, id))?;

        let warning = self
            .recorder
            .record(
                actor,
                action,
                entity,
                &display_key(id),
                Some(Value::Object(state.clone())),
            )
            .into_warning();
        Ok(Audited {
            value: state,
            warning,
        })
    }

    fn require_soft_delete(&self, entity: &str) -> Result<&dyn EntityAdapter, RepositoryError> {
        let adapter = self.adapters.get(entity)?;
        if adapter.columns().iter().any(|c| c == SOFT_DELETE_COLUMN) {
            Ok(adapter)
        } else {
            Err(RepositoryError::SoftDeleteUnsupported(entity.to_string()))
        }
    }
}

fn not_found(entity: &str, id: &Value) -> RepositoryError {
    RepositoryError::NotFound {
        entity: entity.to_string(),
        id: display_key(id),
    }
}
