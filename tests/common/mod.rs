#![allow(dead_code)]

use backstop_lib::engine::adapter::{AdapterSet, Record};
use backstop_lib::engine::config::Config;
use backstop_lib::engine::database::Database;
use backstop_lib::engine::identity::Actor;
use backstop_lib::engine::restore::RestoreEngine;
use backstop_lib::engine::schema::{EntityDescriptor, ForeignKey, SchemaRegistry};
use backstop_lib::engine::service::Backstop;
use backstop_lib::engine::snapshot::Snapshot;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

pub fn record(value: Value) -> Record {
    value.as_object().expect("record literal must be an object").clone()
}

/// Build a snapshot from `{"Entity": [rows...]}`
pub fn snapshot_of(entities: Value) -> Snapshot {
    let mut snapshot = Snapshot::new(Utc::now());
    for (name, rows) in entities.as_object().expect("entities must be an object") {
        let rows = rows
            .as_array()
            .expect("rows must be an array")
            .iter()
            .cloned()
            .map(record)
            .collect();
        snapshot.entities.insert(name.clone(), rows);
    }
    snapshot
}

/// Generic store with a required chain A <- B <- C and an unrelated D.
/// Declared children first so the registry has to reorder them.
pub struct Chain {
    pub db: Database,
    pub registry: Arc<SchemaRegistry>,
    pub adapters: Arc<AdapterSet>,
}

impl Chain {
    pub fn open(dir: &Path) -> Self {
        let db = Database::new(&dir.join("chain.db")).unwrap();
        db.execute_ddl(
            r#"CREATE TABLE "A" (id INTEGER PRIMARY KEY, name TEXT);
               CREATE TABLE "B" (id INTEGER PRIMARY KEY, aId INTEGER NOT NULL REFERENCES "A"(id), note TEXT);
               CREATE TABLE "C" (id INTEGER PRIMARY KEY, bId INTEGER NOT NULL REFERENCES "B"(id));
               CREATE TABLE "D" (id INTEGER PRIMARY KEY, label TEXT);"#,
        )
        .unwrap();

        let registry = SchemaRegistry::new(vec![
            EntityDescriptor::new("C", "id").with_foreign_key(ForeignKey::required("bId", "B")),
            EntityDescriptor::new("B", "id").with_foreign_key(ForeignKey::required("aId", "A")),
            EntityDescriptor::new("A", "id"),
            EntityDescriptor::new("D", "id"),
        ])
        .unwrap();
        let adapters = AdapterSet::from_columns(
            &registry,
            [
                ("A", &["id", "name"][..]),
                ("B", &["id", "aId", "note"][..]),
                ("C", &["id", "bId"][..]),
                ("D", &["id", "label"][..]),
            ],
        )
        .unwrap();

        Self {
            db,
            registry: Arc::new(registry),
            adapters: Arc::new(adapters),
        }
    }

    pub fn engine(&self) -> RestoreEngine {
        RestoreEngine::new(self.db.clone(), self.registry.clone(), self.adapters.clone())
    }

    pub fn count(&self, table: &str) -> u64 {
        self.db.row_count(table).unwrap()
    }
}

/// A fresh project on the ticketing catalog
pub fn catalog_backstop(dir: &Path) -> Backstop {
    Config::default_for_project("tickets").save(dir).unwrap();
    Backstop::open(dir).unwrap()
}

/// A small but complete ticketing dataset, including self references and a
/// soft-deleted row
pub fn seed_catalog(backstop: &Backstop) {
    let repo = backstop.repository();
    let actor = Actor::new("seed", "Seeder");
    let created = "2026-09-01T10:00:00Z";

    let rows = [
        ("User", json!({"id": "U1", "email": "ana@example.com", "name": "Ana", "role": "seller", "createdAt": created})),
        ("User", json!({"id": "U2", "email": "bo@example.com", "name": "Bo", "role": "customer", "createdAt": created})),
        ("Seller", json!({"id": "S1", "userId": "U1", "displayName": "Ana Events", "bankAccountNumber": "NL91ABNA0417164300", "createdAt": created})),
        ("Category", json!({"id": "CAT-ROOT", "name": "Music"})),
        ("Category", json!({"id": "CAT-JAZZ", "parentId": "CAT-ROOT", "name": "Jazz"})),
        ("Event", json!({"id": "E1", "sellerId": "S1", "categoryId": "CAT-JAZZ", "title": "Late Set", "venue": "Paradiso", "startsAt": "2026-11-01T21:00:00Z", "createdAt": created})),
        ("TicketType", json!({"id": "TT1", "eventId": "E1", "name": "Regular", "priceCents": 2500, "quantity": 200})),
        ("Order", json!({"id": "O1", "userId": "U2", "eventId": "E1", "status": "PAID", "totalCents": 5000, "createdAt": created})),
        ("Ticket", json!({"id": "T1", "orderId": "O1", "ticketTypeId": "TT1", "holderName": "Bo", "createdAt": created})),
        ("Ticket", json!({"id": "T2", "orderId": "O1", "ticketTypeId": "TT1", "transferredFromId": "T1", "holderName": "Cy", "createdAt": created})),
        ("PromoCode", json!({"id": "P1", "eventId": "E1", "code": "JAZZ10", "discountPercent": 10})),
    ];
    for (entity, row) in rows {
        repo.create(&actor, entity, record(row)).unwrap();
    }
    repo.soft_delete(&actor, "User", &json!("U2")).unwrap();
}
