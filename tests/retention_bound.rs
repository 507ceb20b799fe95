mod common;

use backstop_lib::engine::retention::store::parse_filename;
use backstop_lib::engine::retention::RunOutcome;
use backstop_lib::engine::snapshot::BackupKind;
use chrono::{TimeZone, Utc};
use common::{catalog_backstop, seed_catalog};
use std::error::Error;
use tempfile::tempdir;

#[test]
fn test_eight_runs_leave_three_newest_automatic_backups() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let backstop = catalog_backstop(dir.path());
    seed_catalog(&backstop);
    let scheduler = backstop.scheduler();
    assert_eq!(scheduler.policy().keep_automatic, 3);

    // More manual artifacts than the automatic bound
    let mut manual = Vec::new();
    for day in 1..=5 {
        let mut snapshot = backstop.create_snapshot(BackupKind::Manual)?;
        snapshot.created_at = Utc.with_ymd_and_hms(2026, 9, day, 12, 0, 0).unwrap();
        manual.push(backstop.backup_store().save_snapshot(BackupKind::Manual, &snapshot)?);
    }

    let mut pruned_total = Vec::new();
    for day in 1..=8 {
        let now = Utc.with_ymd_and_hms(2026, 10, day, 2, 0, 0).unwrap();
        match scheduler.run_once_at(now)? {
            RunOutcome::Completed { pruned, .. } => pruned_total.extend(pruned),
            RunOutcome::Skipped => panic!("run on day {day} was skipped"),
        }
    }
    assert_eq!(pruned_total.len(), 5);

    let auto = backstop.list_auto_backups()?;
    let days: Vec<u32> = auto
        .iter()
        .map(|m| chrono::Datelike::day(&m.created_at))
        .collect();
    assert_eq!(days, vec![8, 7, 6]);
    assert!(auto.iter().all(|m| m.kind == BackupKind::Automatic));

    // Manual artifacts are never pruned, and pruned ones leave no sidecar
    let all = backstop.list_backups()?;
    assert_eq!(all.len(), 8);
    assert_eq!(backstop.backup_store().list_kind(BackupKind::Manual)?.len(), 5);
    for kept in &manual {
        assert!(all.iter().any(|m| m.filename == kept.filename));
    }
    for name in &pruned_total {
        let path = backstop.backup_store().dir().join(name);
        assert!(!path.exists());
        assert!(!backstop.backup_store().dir().join(format!("{name}.sha256")).exists());
    }
    for m in &all {
        backstop.verify_backup(&m.filename)?;
    }
    Ok(())
}

#[test]
fn test_automatic_names_are_date_stamped() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let backstop = catalog_backstop(dir.path());
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap();

    let RunOutcome::Completed { manifest, pruned } = backstop.scheduler().run_once_at(now)? else {
        panic!("run skipped");
    };
    assert!(pruned.is_empty());
    assert_eq!(manifest.filename, "backup-auto-v1-20261016T020000.000Z.json");

    let parsed = parse_filename(&manifest.filename).ok_or("name did not parse")?;
    assert_eq!(parsed.kind, BackupKind::Automatic);
    assert_eq!(parsed.created_at, now);
    Ok(())
}

#[test]
fn test_failed_run_does_not_block_the_next() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let backstop = catalog_backstop(dir.path());
    let scheduler = backstop.scheduler();
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap();

    scheduler.run_once_at(now)?;
    // Same timestamp again collides with the stored artifact
    assert!(scheduler.run_once_at(now).is_err());

    let later = Utc.with_ymd_and_hms(2026, 10, 17, 2, 0, 0).unwrap();
    assert!(matches!(
        scheduler.run_once_at(later)?,
        RunOutcome::Completed { .. }
    ));
    assert_eq!(backstop.list_auto_backups()?.len(), 2);
    Ok(())
}
