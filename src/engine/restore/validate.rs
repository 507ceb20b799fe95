//! Pre-write validation of a snapshot against the registry
//!
//! Everything here runs before the restore transaction opens, so a rejected
//! artifact never touches the store.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::RestoreError;
use crate::engine::adapter::value::{display_key, key_of};
use crate::engine::adapter::AdapterSet;
use crate::engine::schema::SchemaRegistry;
use crate::engine::snapshot::{Snapshot, SUPPORTED_SCHEMA_VERSIONS};

pub fn check_schema_version(snapshot: &Snapshot) -> Result<(), RestoreError> {
    if SUPPORTED_SCHEMA_VERSIONS.contains(&snapshot.schema_version) {
        Ok(())
    } else {
        Err(RestoreError::UnsupportedSchemaVersion {
            found: snapshot.schema_version,
            supported: SUPPORTED_SCHEMA_VERSIONS.to_vec(),
        })
    }
}

/// Check record shape and referential integrity, stopping at the first
/// violation. Entities are visited in write order, records in artifact order
/// and foreign keys in declaration order, so the reported violation is
/// deterministic.
pub fn check_integrity(
    snapshot: &Snapshot,
    registry: &SchemaRegistry,
    adapters: &AdapterSet,
) -> Result<(), RestoreError> {
    for name in snapshot.entities.keys() {
        if registry.get(name).is_none() {
            return Err(RestoreError::UnknownEntity(name.clone()));
        }
    }

    let mut keys: HashMap<&str, HashSet<String>> = HashMap::new();
    for name in registry.topological_order() {
        let Some(rows) = snapshot.entities.get(name) else {
            continue;
        };
        let descriptor = registry.describe(name)?;
        let adapter = adapters.get(name)?;
        let seen = keys.entry(name.as_str()).or_default();

        for (index, record) in rows.iter().enumerate() {
            let id = match record.get(&descriptor.primary_key) {
                Some(v) if !v.is_null() => v,
                _ => {
                    return Err(RestoreError::MalformedRecord {
                        entity: name.clone(),
                        index,
                        reason: format!("missing primary key {}", descriptor.primary_key),
                    })
                }
            };

            if let Some(field) = record.keys().find(|f| !adapter.columns().contains(*f)) {
                return Err(RestoreError::IntegrityViolation {
                    entity: name.clone(),
                    record_id: display_key(id),
                    field: field.clone(),
                    reason: "field is not a column of this entity".to_string(),
                });
            }

            if !seen.insert(key_of(id)) {
                return Err(RestoreError::IntegrityViolation {
                    entity: name.clone(),
                    record_id: display_key(id),
                    field: descriptor.primary_key.clone(),
                    reason: "duplicate primary key".to_string(),
                });
            }
        }
    }

    for name in registry.topological_order() {
        let Some(rows) = snapshot.entities.get(name) else {
            continue;
        };
        let descriptor = registry.describe(name)?;

        for record in rows {
            for fk in &descriptor.foreign_keys {
                let value = match record.get(&fk.field) {
                    None | Some(Value::Null) => continue,
                    Some(v) => v,
                };
                if registry.is_excluded(&fk.target_entity) {
                    continue;
                }

                let resolves = keys
                    .get(fk.target_entity.as_str())
                    .is_some_and(|set| set.contains(&key_of(value)));
                if !resolves {
                    let id = &record[&descriptor.primary_key];
                    return Err(RestoreError::IntegrityViolation {
                        entity: name.clone(),
                        record_id: display_key(id),
                        field: fk.field.clone(),
                        reason: format!(
                            "references {} {} which is not in the snapshot",
                            fk.target_entity,
                            display_key(value)
                        ),
                    });
                }
            }
        }
    }

    Ok(())
}
