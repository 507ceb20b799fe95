mod common;

use backstop_lib::engine::identity::Actor;
use backstop_lib::engine::restore::RestoreError;
use backstop_lib::engine::service::ServiceError;
use backstop_lib::engine::snapshot::BackupKind;
use common::{catalog_backstop, seed_catalog, snapshot_of, Chain};
use serde_json::{json, Value};
use std::error::Error;
use tempfile::tempdir;

#[test]
fn test_round_trip_into_empty_store() -> Result<(), Box<dyn Error>> {
    let source_dir = tempdir()?;
    let source = catalog_backstop(source_dir.path());
    seed_catalog(&source);
    let bytes = source.create_backup(BackupKind::Manual)?;
    let exported = source.create_snapshot(BackupKind::Manual)?;

    let target_dir = tempdir()?;
    let target = catalog_backstop(target_dir.path());
    let restored = target.restore_backup(&Actor::system(), &bytes)?;

    assert_eq!(restored.value.rows_written(), exported.record_count());
    // CAT-JAZZ sorts before its parent CAT-ROOT, so its parentId is patched
    assert!(restored.value.patched_fields >= 1);

    let reproduced = target.create_snapshot(BackupKind::Manual)?;
    assert_eq!(reproduced.entities, exported.entities);

    // The soft-deleted user travels like any other row
    let bo = reproduced.entities["User"]
        .iter()
        .find(|u| u["id"] == "U2")
        .ok_or("U2 missing")?;
    assert!(bo["deletedAt"].is_string());
    Ok(())
}

#[test]
fn test_restore_twice_equals_once() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let backstop = catalog_backstop(dir.path());
    seed_catalog(&backstop);
    let bytes = backstop.create_backup(BackupKind::Manual)?;
    let actor = Actor::new("ops", "Ops");

    backstop
        .repository()
        .update(&actor, "Event", &json!("E1"), common::record(json!({"title": "Renamed"})))?;

    let first = backstop.restore_backup(&actor, &bytes)?;
    let after_first = backstop.create_snapshot(BackupKind::Manual)?;
    let second = backstop.restore_backup(&actor, &bytes)?;
    let after_second = backstop.create_snapshot(BackupKind::Manual)?;

    assert_eq!(after_first.entities, after_second.entities);
    assert_eq!(after_first.entities["Event"][0]["title"], "Late Set");
    assert_eq!(first.value.rows_written(), second.value.rows_written());
    assert!(second.value.entities.iter().all(|s| s.inserted == 0));
    Ok(())
}

#[test]
fn test_one_bad_reference_among_ten_thousand_writes_nothing() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let chain = Chain::open(dir.path());
    chain.engine().restore(&snapshot_of(json!({
        "A": [{"id": 1, "name": "live"}],
        "D": [{"id": 1, "label": "live"}]
    })))?;

    let a: Vec<Value> = (1..=5_000)
        .map(|i| json!({"id": i, "name": format!("a{i}")}))
        .collect();
    let mut b: Vec<Value> = (1..=5_000)
        .map(|i| json!({"id": i, "aId": i, "note": null}))
        .collect();
    b[4_321]["aId"] = json!(99_999);

    let err = chain
        .engine()
        .restore(&snapshot_of(json!({ "A": a, "B": b })))
        .unwrap_err();

    match err {
        RestoreError::IntegrityViolation {
            entity,
            record_id,
            field,
            ..
        } => {
            assert_eq!(entity, "B");
            assert_eq!(record_id, "4322");
            assert_eq!(field, "aId");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(chain.count("A"), 1);
    assert_eq!(chain.count("B"), 0);
    assert_eq!(chain.count("D"), 1);
    Ok(())
}

#[test]
fn test_required_chain_written_parents_first() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let chain = Chain::open(dir.path());
    let order = chain.registry.topological_order();
    let pos = |name: &str| order.iter().position(|n| n == name);
    assert!(pos("A") < pos("B") && pos("B") < pos("C"));

    // Listed children first; foreign keys are enforced so any other order fails
    let report = chain.engine().restore(&snapshot_of(json!({
        "C": [{"id": 1, "bId": 1}],
        "B": [{"id": 1, "aId": 1, "note": "b"}],
        "A": [{"id": 1, "name": "a"}]
    })))?;

    assert_eq!(report.write_order(), vec!["A", "B", "C"]);
    assert_eq!(report.patched_fields, 0);
    assert_eq!(chain.count("C"), 1);
    Ok(())
}

#[test]
fn test_entities_missing_from_snapshot_keep_their_rows() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let chain = Chain::open(dir.path());
    chain.engine().restore(&snapshot_of(json!({
        "A": [{"id": 1, "name": "old"}, {"id": 2, "name": "extra"}],
        "D": [{"id": 1, "label": "d1"}, {"id": 2, "label": "d2"}]
    })))?;

    let report = chain.engine().restore(&snapshot_of(json!({
        "A": [{"id": 1, "name": "new"}]
    })))?;

    assert_eq!(report.stats("A").map(|s| s.replaced), Some(1));
    assert_eq!(chain.count("D"), 2);
    // Absent rows of a restored entity survive as well
    assert_eq!(chain.count("A"), 2);

    let conn = chain.db.get_connection()?;
    let name: String = conn.query_row("SELECT name FROM \"A\" WHERE id = 1", [], |r| r.get(0))?;
    assert_eq!(name, "new");
    Ok(())
}

#[test]
fn test_upsert_replaces_the_whole_row() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let chain = Chain::open(dir.path());
    chain.engine().restore(&snapshot_of(json!({
        "A": [{"id": 1, "name": "a"}],
        "B": [{"id": 1, "aId": 1, "note": "keep me?"}]
    })))?;

    chain.engine().restore(&snapshot_of(json!({
        "A": [{"id": 1, "name": "a"}],
        "B": [{"id": 1, "aId": 1}]
    })))?;

    let conn = chain.db.get_connection()?;
    let note: Option<String> =
        conn.query_row("SELECT note FROM \"B\" WHERE id = 1", [], |r| r.get(0))?;
    assert_eq!(note, None);
    Ok(())
}

#[test]
fn test_seller_restored_before_its_event() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let backstop = catalog_backstop(dir.path());
    let created = "2026-10-01T09:00:00Z";

    let mut snapshot = snapshot_of(json!({
        "Event": [{"id": "E1", "sellerId": "S1", "title": "Opening Night", "createdAt": created}],
        "Seller": [{"id": "S1", "displayName": "Box Office", "createdAt": created}]
    }));
    snapshot.created_at = chrono::DateTime::parse_from_rfc3339(created)?.into();
    let restored = backstop.restore_backup(&Actor::system(), &snapshot.to_bytes()?)?;

    assert_eq!(restored.value.write_order(), vec!["Seller", "Event"]);
    let repo = backstop.repository();
    let event = repo.find("Event", &json!("E1"))?.ok_or("E1 missing")?;
    assert_eq!(event["sellerId"], "S1");
    assert!(repo.find("Seller", &event["sellerId"])?.is_some());
    Ok(())
}

#[test]
fn test_rejected_artifact_is_not_audited() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let backstop = catalog_backstop(dir.path());
    let snapshot = snapshot_of(json!({
        "Event": [{"id": "E1", "sellerId": "S404", "title": "Ghost", "createdAt": "2026-10-01T09:00:00Z"}]
    }));

    let err = backstop
        .restore_backup(&Actor::system(), &snapshot.to_bytes()?)
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Restore(ref e) if e.is_rejection()
    ));
    assert!(backstop.list_audit_log(10)?.is_empty());
    assert_eq!(backstop.database().row_count("Event")?, 0);
    Ok(())
}
