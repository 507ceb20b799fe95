//! Audit Module
//!
//! Append-only audit trail of data mutations and restores

pub mod audit;
pub mod audited;
pub mod recorder;
pub mod store;

pub use audit::{AuditAction, AuditLogEntry, JsonlAuditStore};
pub use audited::{Audited, AuditedRepository, RepositoryError};
pub use recorder::{AuditOutcome, AuditRecorder, AuditWarning};
pub use store::{AuditError, AuditFilter, AuditStore, SqliteAuditStore, AUDIT_TABLE};
