//! Retention Scheduler
//!
//! Periodically writes an AUTOMATIC snapshot into the backup store and prunes
//! automatic artifacts down to the newest `keep_automatic`. Manual artifacts
//! are never touched.
//!
//! Runs never overlap. A trigger arriving while a run is in progress (timer
//! tick, `run_now`, or a direct `run_once` from another caller) is skipped,
//! not queued.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::store::{BackupManifest, BackupStore, BackupStoreError};
use crate::engine::snapshot::{BackupKind, SnapshotError, SnapshotWriter};

pub const DEFAULT_KEEP_AUTOMATIC: usize = 3;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Backup store error: {0}")]
    Store(#[from] BackupStoreError),
    #[error("Scheduler run panicked or was cancelled: {0}")]
    Join(String),
    #[error("Scheduler is not running")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub keep_automatic: usize,
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_automatic: DEFAULT_KEEP_AUTOMATIC,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was in progress
    Skipped,
    Completed {
        manifest: BackupManifest,
        pruned: Vec<String>,
    },
}

/// Clears the in-progress flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct RetentionScheduler {
    writer: SnapshotWriter,
    store: BackupStore,
    policy: RetentionPolicy,
    running: Arc<AtomicBool>,
}

impl RetentionScheduler {
    pub fn new(writer: SnapshotWriter, store: BackupStore, policy: RetentionPolicy) -> Self {
        Self {
            writer,
            store,
            policy,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn run_once(&self) -> Result<RunOutcome, SchedulerError> {
        self.run_once_at(Utc::now())
    }

    /// One scheduled run, stamping the snapshot with `now`
    pub fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunOutcome, SchedulerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("retention run already in progress, skipping trigger");
            return Ok(RunOutcome::Skipped);
        }
        let _guard = RunGuard(&self.running);

        let snapshot = self.writer.create_snapshot_at(BackupKind::Automatic, now)?;
        let manifest = self.store.save_snapshot(BackupKind::Automatic, &snapshot)?;
        let pruned = self.prune()?;

        info!(
            filename = %manifest.filename,
            pruned = pruned.len(),
            "retention run completed"
        );
        Ok(RunOutcome::Completed { manifest, pruned })
    }

    /// Delete automatic artifacts beyond the newest `keep_automatic`,
    /// oldest first. Returns the deleted filenames.
    pub fn prune(&self) -> Result<Vec<String>, SchedulerError> {
        let automatic = self.store.list_kind(BackupKind::Automatic)?;
        let mut pruned = Vec::new();
        for manifest in automatic.iter().skip(self.policy.keep_automatic).rev() {
            self.store.delete(&manifest.filename)?;
            info!(filename = %manifest.filename, "pruned automatic backup");
            pruned.push(manifest.filename.clone());
        }
        Ok(pruned)
    }

    /// Start the timer loop on the current tokio runtime
    pub fn spawn(self) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(self.run(cmd_rx));
        SchedulerHandle { cmd_tx, join }
    }

    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<SchedulerCommand>) {
        let mut interval = tokio::time::interval(self.policy.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first immediate tick
        interval.tick().await;
        info!(interval_secs = self.policy.interval.as_secs(), "retention scheduler started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::RunNow { reply }) => self.trigger(Some(reply)),
                        Some(SchedulerCommand::Shutdown) | None => break,
                    }
                }
                _ = interval.tick() => self.trigger(None),
            }
        }
        info!("retention scheduler stopped");
    }

    /// Run in the background so the loop keeps receiving triggers, which the
    /// in-progress guard then skips
    fn trigger(&self, reply: Option<oneshot::Sender<Result<RunOutcome, SchedulerError>>>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || scheduler.run_once())
                .await
                .unwrap_or_else(|e| Err(SchedulerError::Join(e.to_string())));

            if let Err(e) = &result {
                error!(error = %e, "retention run failed");
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    RunNow {
        reply: oneshot::Sender<Result<RunOutcome, SchedulerError>>,
    },
    Shutdown,
}

/// Control handle for a spawned scheduler
pub struct SchedulerHandle {
    cmd_tx: mpsc::UnboundedSender<SchedulerCommand>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Trigger a run outside the timer and wait for its outcome
    pub async fn run_now(&self) -> Result<RunOutcome, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SchedulerCommand::RunNow { reply })
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Stop the timer loop. A run already in progress finishes on its own.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Shutdown);
        if let Err(e) = self.join.await {
            error!(error = %e, "retention scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::AdapterSet;
    use crate::engine::database::Database;
    use crate::engine::schema::{EntityDescriptor, SchemaRegistry};
    use chrono::TimeZone;
    use tempfile::{tempdir, TempDir};

    fn scheduler(dir: &TempDir) -> RetentionScheduler {
        let db = Database::new(&dir.path().join("app.db")).unwrap();
        db.execute_ddl(r#"CREATE TABLE "Seller" (id TEXT PRIMARY KEY); INSERT INTO "Seller" VALUES ('S1');"#)
            .unwrap();
        let registry = SchemaRegistry::new(vec![EntityDescriptor::new("Seller", "id")]).unwrap();
        let adapters = AdapterSet::from_columns(&registry, [("Seller", &["id"][..])]).unwrap();
        let writer = SnapshotWriter::new(db, Arc::new(registry), Arc::new(adapters));
        let store = BackupStore::open(&dir.path().join("backups")).unwrap();
        RetentionScheduler::new(writer, store, RetentionPolicy::default())
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_prunes_oldest_automatic_only() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(&dir);
        let store = BackupStore::open(&dir.path().join("backups")).unwrap();
        store.write(BackupKind::Manual, 1, day(1), b"{}").unwrap();

        for d in 2..=5 {
            scheduler.run_once_at(day(d)).unwrap();
        }

        let automatic = store.list_kind(BackupKind::Automatic).unwrap();
        let days: Vec<DateTime<Utc>> = automatic.iter().map(|m| m.created_at).collect();
        assert_eq!(days, vec![day(5), day(4), day(3)]);
        assert_eq!(store.list_kind(BackupKind::Manual).unwrap().len(), 1);
    }

    #[test]
    fn test_trigger_during_run_is_skipped() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(&dir);

        scheduler.running.store(true, Ordering::Release);
        assert_eq!(scheduler.run_once_at(day(2)).unwrap(), RunOutcome::Skipped);

        scheduler.running.store(false, Ordering::Release);
        assert!(matches!(
            scheduler.run_once_at(day(2)).unwrap(),
            RunOutcome::Completed { .. }
        ));
    }

    #[test]
    fn test_failed_run_releases_guard() {
        let dir = tempdir().unwrap();
        let scheduler = scheduler(&dir);
        scheduler.run_once_at(day(2)).unwrap();

        // Same timestamp again collides with the existing artifact
        assert!(scheduler.run_once_at(day(2)).is_err());
        assert!(!scheduler.running.load(Ordering::Acquire));
        assert!(scheduler.run_once_at(day(3)).is_ok());
    }

    #[tokio::test]
    async fn test_spawned_run_now_and_shutdown() {
        let dir = tempdir().unwrap();
        let handle = scheduler(&dir).spawn();

        let outcome = handle.run_now().await.unwrap();
        match outcome {
            RunOutcome::Completed { manifest, pruned } => {
                assert_eq!(manifest.kind, BackupKind::Automatic);
                assert!(pruned.is_empty());
            }
            RunOutcome::Skipped => panic!("nothing else was running"),
        }

        handle.shutdown().await;
    }
}
