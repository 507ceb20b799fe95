//! Restore Engine
//!
//! Applies a snapshot to the live store inside one immediate transaction:
//!
//! 1. reject unsupported schema versions,
//! 2. reject artifacts whose foreign keys don't resolve inside the snapshot,
//! 3. upsert entities parents-first, nulling deferred (optional or self)
//!    foreign keys whose target row hasn't been written yet,
//! 4. patch the deferred fields once every row exists,
//! 5. commit.
//!
//! Any failure rolls the whole transaction back. Rows the store holds but the
//! snapshot doesn't are left alone: restore overwrites per row and never
//! deletes by omission.

pub mod report;
pub mod validate;

pub use report::{EntityRestoreStats, RestoreReport};

use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::adapter::value::{display_key, key_of};
use crate::engine::adapter::{AdapterError, AdapterSet, Record, UpsertOutcome};
use crate::engine::database::{Database, DatabaseError};
use crate::engine::schema::{SchemaError, SchemaRegistry};
use crate::engine::snapshot::Snapshot;

pub const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Unsupported snapshot schema version {found} (supported: {supported:?})")]
    UnsupportedSchemaVersion { found: u32, supported: Vec<u32> },
    #[error("Integrity violation in {entity} {record_id}, field {field}: {reason}")]
    IntegrityViolation {
        entity: String,
        record_id: String,
        field: String,
        reason: String,
    },
    #[error("Snapshot contains unknown entity {0}")]
    UnknownEntity(String),
    #[error("Malformed {entity} record at index {index}: {reason}")]
    MalformedRecord {
        entity: String,
        index: usize,
        reason: String,
    },
    #[error("Writing {entity} {record_id} failed: {reason}")]
    Storage {
        entity: String,
        record_id: String,
        reason: String,
    },
    #[error("Restore exceeded its {limit:?} deadline and was rolled back")]
    TimedOut { limit: Duration },
    #[error("Restore commit failed, store state must be checked: {0}")]
    PartialRestore(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

impl RestoreError {
    /// Rejected before the transaction opened, so the store was never touched
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RestoreError::UnsupportedSchemaVersion { .. }
                | RestoreError::IntegrityViolation { .. }
                | RestoreError::UnknownEntity(_)
                | RestoreError::MalformedRecord { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Hard limit on the write phase; `None` disables it
    pub timeout: Option<Duration>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_RESTORE_TIMEOUT),
        }
    }
}

/// Deferred foreign-key values to write once their targets exist
struct Patch<'s> {
    entity: &'s str,
    id: &'s Value,
    fields: Record,
}

struct Deadline {
    at: Option<Instant>,
    limit: Duration,
}

impl Deadline {
    fn new(start: Instant, timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| start + t),
            limit: timeout.unwrap_or_default(),
        }
    }

    fn check(&self) -> Result<(), RestoreError> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(RestoreError::TimedOut { limit: self.limit }),
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct RestoreEngine {
    db: Database,
    registry: Arc<SchemaRegistry>,
    adapters: Arc<AdapterSet>,
    options: RestoreOptions,
}

impl RestoreEngine {
    pub fn new(db: Database, registry: Arc<SchemaRegistry>, adapters: Arc<AdapterSet>) -> Self {
        Self {
            db,
            registry,
            adapters,
            options: RestoreOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RestoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and apply a snapshot. See the module docs for the steps.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<RestoreReport, RestoreError> {
        let start = Instant::now();

        validate::check_schema_version(snapshot)?;
        validate::check_integrity(snapshot, &self.registry, &self.adapters)?;

        let deadline = Deadline::new(start, self.options.timeout);
        let mut conn = self.db.get_connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DatabaseError::from)?;

        let (entities, patched_fields) = match self.write_all(&tx, snapshot, &deadline) {
            Ok(done) => done,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(error = %rollback_err, "restore rollback failed");
                }
                warn!(error = %e, "restore aborted and rolled back");
                return Err(e);
            }
        };

        tx.commit().map_err(|e| {
            error!(error = %e, "restore commit failed");
            RestoreError::PartialRestore(e.to_string())
        })?;

        let report = RestoreReport {
            schema_version: snapshot.schema_version,
            snapshot_created_at: snapshot.created_at,
            entities,
            patched_fields,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            rows = report.rows_written(),
            patched = report.patched_fields,
            elapsed_ms = report.duration_ms,
            "restore committed"
        );
        Ok(report)
    }

    fn write_all<'s>(
        &self,
        conn: &Connection,
        snapshot: &'s Snapshot,
        deadline: &Deadline,
    ) -> Result<(Vec<EntityRestoreStats>, usize), RestoreError> {
        let mut written: HashMap<&str, HashSet<String>> = HashMap::new();
        let mut patches: Vec<Patch<'s>> = Vec::new();
        let mut stats = Vec::new();

        for name in self.registry.topological_order() {
            let Some((entity, rows)) = snapshot.entities.get_key_value(name) else {
                continue;
            };
            if self.registry.is_excluded(name) {
                warn!(entity = %name, rows = rows.len(), "skipping excluded entity found in snapshot");
                continue;
            }

            let descriptor = self.registry.describe(name)?;
            let adapter = self.adapters.get(name)?;
            let mut entity_stats = EntityRestoreStats {
                entity: entity.clone(),
                inserted: 0,
                replaced: 0,
            };

            for record in rows {
                deadline.check()?;
                let id = &record[&descriptor.primary_key];

                let mut row = record.clone();
                let mut deferred = Record::new();
                for fk in descriptor.deferred_edges() {
                    let Some(value) = record.get(&fk.field).filter(|v| !v.is_null()) else {
                        continue;
                    };
                    let ready = written
                        .get(fk.target_entity.as_str())
                        .is_some_and(|set| set.contains(&key_of(value)));
                    if !ready {
                        deferred.insert(fk.field.clone(), value.clone());
                        row.insert(fk.field.clone(), Value::Null);
                    }
                }

                let outcome = adapter.upsert(conn, &row).map_err(|e| RestoreError::Storage {
                    entity: entity.clone(),
                    record_id: display_key(id),
                    reason: e.to_string(),
                })?;
                match outcome {
                    UpsertOutcome::Inserted => entity_stats.inserted += 1,
                    UpsertOutcome::Replaced => entity_stats.replaced += 1,
                }

                written.entry(entity.as_str()).or_default().insert(key_of(id));
                if !deferred.is_empty() {
                    patches.push(Patch {
                        entity: entity.as_str(),
                        id,
                        fields: deferred,
                    });
                }
            }

            debug!(
                entity = %name,
                inserted = entity_stats.inserted,
                replaced = entity_stats.replaced,
                "restored entity"
            );
            stats.push(entity_stats);
        }

        let mut patched_fields = 0;
        for patch in &patches {
            deadline.check()?;
            let adapter = self.adapters.get(patch.entity)?;
            adapter
                .patch(conn, patch.id, &patch.fields)
                .map_err(|e| RestoreError::Storage {
                    entity: patch.entity.to_string(),
                    record_id: display_key(patch.id),
                    reason: e.to_string(),
                })?;
            patched_fields += patch.fields.len();
        }

        deadline.check()?;
        Ok((stats, patched_fields))
    }
}
