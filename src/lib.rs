//! Backstop - whole-store snapshots, integrity-preserving restore and an
//! append-only audit trail for a SQLite-backed ticketing store.
//!
//! The pieces, bottom up:
//!
//! - [`engine::schema`]: statically declared entities and their foreign-key
//!   edges, with a parents-first write order
//! - [`engine::adapter`]: one read/upsert adapter per entity
//! - [`engine::snapshot`]: the versioned JSON artifact and its writer
//! - [`engine::restore`]: validation and the single-transaction restore
//! - [`engine::audit`]: audit entries, stores and the audited repository
//! - [`engine::retention`]: the artifact directory and the daily scheduler
//! - [`engine::service`]: the administrative operations used by the CLI and API

pub mod engine;

pub use engine::identity::Actor;
pub use engine::service::{Backstop, ServiceError};
pub use engine::snapshot::{BackupKind, Snapshot};
