//! Audit Recorder
//!
//! Writes exactly one entry per call. A store failure never fails the
//! business operation that triggered it: it is logged and handed back as an
//! [`AuditWarning`] for the caller to surface.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::audit::{AuditAction, AuditLogEntry};
use super::store::{AuditError, AuditFilter, AuditStore};
use crate::engine::identity::Actor;

/// Non-fatal report of an audit entry that could not be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditWarning {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
}

impl fmt::Display for AuditWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "audit entry {} {} {} was not recorded: {}",
            self.action, self.entity_type, self.entity_id, self.message
        )
    }
}

#[derive(Debug, Clone)]
pub enum AuditOutcome {
    Recorded(AuditLogEntry),
    Failed(AuditWarning),
}

impl AuditOutcome {
    pub fn entry(&self) -> Option<&AuditLogEntry> {
        match self {
            AuditOutcome::Recorded(entry) => Some(entry),
            AuditOutcome::Failed(_) => None,
        }
    }

    pub fn into_warning(self) -> Option<AuditWarning> {
        match self {
            AuditOutcome::Recorded(_) => None,
            AuditOutcome::Failed(warning) => Some(warning),
        }
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        entity_data: Option<Value>,
    ) -> AuditOutcome {
        let mut entry = AuditLogEntry::new(actor, action, entity_type, entity_id);
        entry.entity_data = entity_data;

        match self.store.append(&entry) {
            Ok(()) => {
                debug!(%action, entity_type, entity_id, user = %actor.id, "audit entry recorded");
                AuditOutcome::Recorded(entry)
            }
            Err(e) => {
                warn!(%action, entity_type, entity_id, error = %e, "audit write failed");
                AuditOutcome::Failed(AuditWarning {
                    action,
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Most recent entries first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.store.list_recent(limit)
    }

    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.store.query(filter)
    }

    pub fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.store.query(&AuditFilter::entity(entity_type, entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::audit::SqliteAuditStore;
    use crate::engine::database::Database;
    use serde_json::json;

    struct BrokenStore;

    impl AuditStore for BrokenStore {
        fn append(&self, _entry: &AuditLogEntry) -> Result<(), AuditError> {
            Err(AuditError::Corrupt("disk full".to_string()))
        }
        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, AuditError> {
            Ok(vec![])
        }
        fn count(&self) -> Result<usize, AuditError> {
            Ok(0)
        }
    }

    #[test]
    fn test_store_failure_becomes_warning() {
        let recorder = AuditRecorder::new(Arc::new(BrokenStore));
        let outcome = recorder.record(&Actor::system(), AuditAction::Delete, "Seller", "S1", None);

        let warning = outcome.into_warning().unwrap();
        assert_eq!(warning.action, AuditAction::Delete);
        assert!(warning.to_string().contains("disk full"));
    }

    #[test]
    fn test_concurrent_recording() {
        let store = SqliteAuditStore::new(Database::in_memory().unwrap()).unwrap();
        let recorder = AuditRecorder::new(Arc::new(store));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    let actor = Actor::new(&format!("u{i}"), "worker");
                    recorder.record(
                        &actor,
                        AuditAction::Create,
                        "Event",
                        &format!("E{i}"),
                        Some(json!({"id": format!("E{i}")})),
                    )
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().entry().is_some());
        }

        assert_eq!(recorder.list_recent(100).unwrap().len(), 8);
        assert_eq!(recorder.entity_history("Event", "E3").unwrap().len(), 1);
    }
}
