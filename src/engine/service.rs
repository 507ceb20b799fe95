//! Backstop Service
//!
//! The administrative operations, wired from configuration: create, store and
//! restore backups, list automatic backups and read the audit log. The CLI and
//! the REST API are thin layers over this type.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::adapter::{AdapterError, AdapterSet};
use crate::engine::audit::{
    AuditAction, AuditError, AuditFilter, AuditLogEntry, AuditRecorder, AuditStore, Audited,
    AuditedRepository, JsonlAuditStore, RepositoryError, SqliteAuditStore,
};
use crate::engine::config::{AuditStoreKind, Config, ConfigError};
use crate::engine::database::{Database, DatabaseError};
use crate::engine::identity::Actor;
use crate::engine::restore::{RestoreEngine, RestoreError, RestoreOptions, RestoreReport};
use crate::engine::retention::{
    BackupManifest, BackupStore, BackupStoreError, RetentionPolicy, RetentionScheduler,
    SchedulerError,
};
use crate::engine::schema::{catalog, SchemaError, SchemaRegistry};
use crate::engine::snapshot::{BackupKind, Snapshot, SnapshotError, SnapshotWriter};

/// Entity type recorded on RESTORE entries written for a whole snapshot
pub const SNAPSHOT_ENTITY_TYPE: &str = "Snapshot";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    BackupStore(#[from] BackupStoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("Background task failed: {0}")]
    Task(String),
}

#[derive(Clone)]
pub struct Backstop {
    db: Database,
    adapters: Arc<AdapterSet>,
    writer: SnapshotWriter,
    restorer: RestoreEngine,
    recorder: AuditRecorder,
    store: BackupStore,
    scheduler: RetentionScheduler,
}

impl Backstop {
    /// Load `backstop.config.json` from a project directory and open everything
    pub fn open(project_dir: &Path) -> Result<Self, ServiceError> {
        let config = Config::load(project_dir)?;
        Self::from_config(project_dir, &config)
    }

    pub fn from_config(project_dir: &Path, config: &Config) -> Result<Self, ServiceError> {
        let db_path = Config::resolve(project_dir, &config.database.path);
        let db = Database::with_busy_timeout(&db_path, config.busy_timeout())?;
        db.ensure_catalog()?;

        // A cycle among required edges is a programming error; refuse to start
        let registry = catalog::registry()?;
        let adapters = AdapterSet::for_catalog(&registry)?;

        let audit_store: Arc<dyn AuditStore> = match config.audit.store {
            AuditStoreKind::Sqlite => Arc::new(SqliteAuditStore::new(db.clone())?),
            AuditStoreKind::Jsonl => Arc::new(JsonlAuditStore::new(&Config::resolve(
                project_dir,
                &config.audit.path,
            ))?),
        };
        let store = BackupStore::open(&Config::resolve(project_dir, &config.backups.dir))?;

        info!(
            project = %config.project.name,
            database = %db_path.display(),
            backups = %store.dir().display(),
            "backstop opened"
        );

        Ok(Self::new(db, registry, adapters, audit_store, store)
            .with_restore_options(RestoreOptions {
                timeout: config.restore_timeout(),
            })
            .with_retention_policy(RetentionPolicy {
                keep_automatic: config.backups.retain_automatic,
                interval: config.backup_interval(),
            }))
    }

    /// Assemble from parts, for registries other than the built-in catalog
    pub fn new(
        db: Database,
        registry: SchemaRegistry,
        adapters: AdapterSet,
        audit_store: Arc<dyn AuditStore>,
        store: BackupStore,
    ) -> Self {
        let registry = Arc::new(registry);
        let adapters = Arc::new(adapters);
        let writer = SnapshotWriter::new(db.clone(), registry.clone(), adapters.clone());
        let restorer = RestoreEngine::new(db.clone(), registry, adapters.clone());
        let scheduler =
            RetentionScheduler::new(writer.clone(), store.clone(), RetentionPolicy::default());

        Self {
            db,
            adapters,
            writer,
            restorer,
            recorder: AuditRecorder::new(audit_store),
            store,
            scheduler,
        }
    }

    pub fn with_restore_options(mut self, options: RestoreOptions) -> Self {
        self.restorer = self.restorer.with_options(options);
        self
    }

    pub fn with_retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.scheduler = RetentionScheduler::new(self.writer.clone(), self.store.clone(), policy);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn backup_store(&self) -> &BackupStore {
        &self.store
    }

    /// Shares the in-progress guard with every other caller of this service
    pub fn scheduler(&self) -> RetentionScheduler {
        self.scheduler.clone()
    }

    pub fn repository(&self) -> AuditedRepository {
        AuditedRepository::new(self.db.clone(), self.adapters.clone(), self.recorder.clone())
    }

    pub fn create_snapshot(&self, kind: BackupKind) -> Result<Snapshot, ServiceError> {
        Ok(self.writer.create_snapshot(kind)?)
    }

    /// Export the store as artifact bytes without persisting them
    pub fn create_backup(&self, kind: BackupKind) -> Result<Vec<u8>, ServiceError> {
        Ok(self.create_snapshot(kind)?.to_bytes()?)
    }

    /// Export the store into the backup directory
    pub fn save_backup(&self, kind: BackupKind) -> Result<BackupManifest, ServiceError> {
        let snapshot = self.create_snapshot(kind)?;
        Ok(self.store.save_snapshot(kind, &snapshot)?)
    }

    /// Decode and restore an artifact, then record one RESTORE entry carrying
    /// the snapshot's top-level metadata
    pub fn restore_backup(
        &self,
        actor: &Actor,
        bytes: &[u8],
    ) -> Result<Audited<RestoreReport>, ServiceError> {
        let snapshot = Snapshot::from_bytes(bytes)?;
        let report = self.restorer.restore(&snapshot)?;

        let metadata = match serde_json::to_value(snapshot.metadata()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "snapshot metadata could not be encoded for the audit entry");
                None
            }
        };
        let warning = self
            .recorder
            .record(
                actor,
                AuditAction::Restore,
                SNAPSHOT_ENTITY_TYPE,
                &snapshot.created_at.to_rfc3339(),
                metadata,
            )
            .into_warning();

        Ok(Audited {
            value: report,
            warning,
        })
    }

    /// Restore a stored artifact after checking it against its checksum
    pub fn restore_from_store(
        &self,
        actor: &Actor,
        filename: &str,
    ) -> Result<Audited<RestoreReport>, ServiceError> {
        let bytes = self.store.read_verified(filename)?;
        self.restore_backup(actor, &bytes)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupManifest>, ServiceError> {
        Ok(self.store.list()?)
    }

    /// Automatic artifacts, newest first
    pub fn list_auto_backups(&self) -> Result<Vec<BackupManifest>, ServiceError> {
        Ok(self.store.list_kind(BackupKind::Automatic)?)
    }

    pub fn verify_backup(&self, filename: &str) -> Result<(), ServiceError> {
        Ok(self.store.verify(filename)?)
    }

    pub fn prune_backups(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.scheduler.prune()?)
    }

    /// Audit entries, newest first
    pub fn list_audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>, ServiceError> {
        Ok(self.recorder.list_recent(limit)?)
    }

    pub fn query_audit_log(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditLogEntry>, ServiceError> {
        Ok(self.recorder.query(filter)?)
    }
}
