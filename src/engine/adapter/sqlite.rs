//! SQLite Entity Adapter
//!
//! Implements EntityAdapter for one table using rusqlite. Statements are
//! built once from the descriptor and column list; identifiers are always
//! quoted since entity names such as `Order` are SQL keywords.

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

use super::value::{value_ref_to_json, SqlValue};
use super::{AdapterError, AdapterResult, EntityAdapter, Record, UpsertOutcome};
use crate::engine::schema::EntityDescriptor;

pub struct SqliteEntityAdapter {
    descriptor: EntityDescriptor,
    columns: Vec<String>,
    select_all_sql: String,
    select_one_sql: String,
    exists_sql: String,
    insert_sql: String,
    upsert_sql: String,
    delete_sql: String,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl SqliteEntityAdapter {
    pub fn new(descriptor: EntityDescriptor, columns: &[&str]) -> AdapterResult<Self> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        if !columns.contains(&descriptor.primary_key) {
            return Err(AdapterError::Schema(format!(
                "primary key {} is not a column of {}",
                descriptor.primary_key, descriptor.name
            )));
        }

        let table = quote(&descriptor.name);
        let pk = quote(&descriptor.primary_key);
        let col_list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != descriptor.primary_key)
            .map(|c| format!("{} = excluded.{}", quote(c), quote(c)))
            .collect();
        let conflict_action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        Ok(Self {
            select_all_sql: format!("SELECT {} FROM {} ORDER BY {}", col_list, table, pk),
            select_one_sql: format!("SELECT {} FROM {} WHERE {} = ?1", col_list, table, pk),
            exists_sql: format!("SELECT 1 FROM {} WHERE {} = ?1", table, pk),
            insert_sql: format!("INSERT INTO {} ({}) VALUES ({})", table, col_list, placeholders),
            upsert_sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
                table, col_list, placeholders, pk, conflict_action
            ),
            delete_sql: format!("DELETE FROM {} WHERE {} = ?1", table, pk),
            descriptor,
            columns,
        })
    }

    fn row_to_record(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let mut record = Record::new();
        for (i, col) in self.columns.iter().enumerate() {
            record.insert(col.clone(), value_ref_to_json(row.get_ref(i)?));
        }
        Ok(record)
    }

    fn check_fields(&self, record: &Record) -> AdapterResult<()> {
        for field in record.keys() {
            if !self.columns.contains(field) {
                return Err(AdapterError::Validation(format!(
                    "{} has no column {}",
                    self.descriptor.name, field
                )));
            }
        }
        Ok(())
    }

    /// Bind values in column order; missing fields bind NULL
    fn bind_all(&self, record: &Record) -> AdapterResult<Vec<SqlValue>> {
        self.check_fields(record)?;
        self.columns
            .iter()
            .map(|col| match record.get(col) {
                Some(v) => SqlValue::from_json(v).map_err(|e| {
                    AdapterError::Validation(format!("{}.{}: {}", self.descriptor.name, col, e))
                }),
                None => Ok(SqlValue::Null),
            })
            .collect()
    }

    fn key_param(&self, id: &Value) -> AdapterResult<SqlValue> {
        if id.is_null() {
            return Err(AdapterError::Validation(format!(
                "{} primary key must not be null",
                self.descriptor.name
            )));
        }
        SqlValue::from_json(id).map_err(AdapterError::Validation)
    }

    fn record_key<'r>(&self, record: &'r Record) -> AdapterResult<&'r Value> {
        record
            .get(&self.descriptor.primary_key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                AdapterError::Validation(format!(
                    "{} record is missing primary key {}",
                    self.descriptor.name, self.descriptor.primary_key
                ))
            })
    }
}

impl EntityAdapter for SqliteEntityAdapter {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn read_all(&self, conn: &Connection) -> AdapterResult<Vec<Record>> {
        let mut stmt = conn.prepare_cached(&self.select_all_sql)?;
        let rows = stmt
            .query_map([], |row| self.row_to_record(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find(&self, conn: &Connection, id: &Value) -> AdapterResult<Option<Record>> {
        let key = self.key_param(id)?;
        let mut stmt = conn.prepare_cached(&self.select_one_sql)?;
        let record = stmt
            .query_row([key], |row| self.row_to_record(row))
            .optional()?;
        Ok(record)
    }

    fn upsert(&self, conn: &Connection, record: &Record) -> AdapterResult<UpsertOutcome> {
        let key = self.key_param(self.record_key(record)?)?;
        let values = self.bind_all(record)?;

        let existed = conn
            .prepare_cached(&self.exists_sql)?
            .query_row([&key], |_| Ok(()))
            .optional()?
            .is_some();

        conn.prepare_cached(&self.upsert_sql)?
            .execute(params_from_iter(values.iter()))?;

        Ok(if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn insert(&self, conn: &Connection, record: &Record) -> AdapterResult<()> {
        self.record_key(record)?;
        let values = self.bind_all(record)?;
        conn.prepare_cached(&self.insert_sql)?
            .execute(params_from_iter(values.iter()))?;
        Ok(())
    }

    fn patch(&self, conn: &Connection, id: &Value, fields: &Record) -> AdapterResult<u64> {
        self.check_fields(fields)?;
        if fields.is_empty() {
            return Ok(0);
        }
        if fields.contains_key(&self.descriptor.primary_key) {
            return Err(AdapterError::Validation(format!(
                "{} primary key cannot be patched",
                self.descriptor.name
            )));
        }

        let set_clauses: Vec<String> = fields
            .keys()
            .enumerate()
            .map(|(i, k)| format!("{} = ?{}", quote(k), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote(&self.descriptor.name),
            set_clauses.join(", "),
            quote(&self.descriptor.primary_key),
            fields.len() + 1
        );

        let mut values = fields
            .iter()
            .map(|(k, v)| {
                SqlValue::from_json(v).map_err(|e| {
                    AdapterError::Validation(format!("{}.{}: {}", self.descriptor.name, k, e))
                })
            })
            .collect::<AdapterResult<Vec<_>>>()?;
        values.push(self.key_param(id)?);

        let affected = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(affected as u64)
    }

    fn delete(&self, conn: &Connection, id: &Value) -> AdapterResult<u64> {
        let key = self.key_param(id)?;
        let affected = conn.prepare_cached(&self.delete_sql)?.execute([key])?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::schema::ForeignKey;
    use serde_json::json;

    fn setup() -> (Connection, SqliteEntityAdapter) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"CREATE TABLE "Order" ("id" TEXT PRIMARY KEY, "userId" TEXT, "status" TEXT, "totalCents" INTEGER);"#,
        )
        .unwrap();
        let descriptor = EntityDescriptor::new("Order", "id")
            .with_foreign_key(ForeignKey::required("userId", "User"));
        let adapter =
            SqliteEntityAdapter::new(descriptor, &["id", "userId", "status", "totalCents"]).unwrap();
        (conn, adapter)
    }

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_upsert_inserts_then_replaces_fully() {
        let (conn, adapter) = setup();

        let first = record(json!({"id": "O1", "userId": "U1", "status": "paid", "totalCents": 500}));
        assert_eq!(adapter.upsert(&conn, &first).unwrap(), UpsertOutcome::Inserted);

        // status omitted: full replacement writes NULL rather than keeping "paid"
        let second = record(json!({"id": "O1", "userId": "U2", "totalCents": 700}));
        assert_eq!(adapter.upsert(&conn, &second).unwrap(), UpsertOutcome::Replaced);

        let row = adapter.find(&conn, &json!("O1")).unwrap().unwrap();
        assert_eq!(row["userId"], json!("U2"));
        assert_eq!(row["status"], Value::Null);
        assert_eq!(row["totalCents"], json!(700));
    }

    #[test]
    fn test_read_all_keeps_column_order() {
        let (conn, adapter) = setup();
        adapter
            .insert(&conn, &record(json!({"totalCents": 1, "id": "B", "status": "x", "userId": "U"})))
            .unwrap();
        adapter
            .insert(&conn, &record(json!({"id": "A", "userId": "U", "status": "y", "totalCents": 2})))
            .unwrap();

        let rows = adapter.read_all(&conn).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!("A"));
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "userId", "status", "totalCents"]);
    }

    #[test]
    fn test_patch_and_delete() {
        let (conn, adapter) = setup();
        adapter
            .insert(&conn, &record(json!({"id": "O1", "userId": "U1", "status": "new", "totalCents": 1})))
            .unwrap();

        let changed = adapter
            .patch(&conn, &json!("O1"), &record(json!({"status": "refunded"})))
            .unwrap();
        assert_eq!(changed, 1);
        let row = adapter.find(&conn, &json!("O1")).unwrap().unwrap();
        assert_eq!(row["status"], json!("refunded"));
        assert_eq!(row["userId"], json!("U1"));

        assert_eq!(adapter.delete(&conn, &json!("O1")).unwrap(), 1);
        assert!(adapter.find(&conn, &json!("O1")).unwrap().is_none());
    }

    #[test]
    fn test_unknown_field_and_missing_key_rejected() {
        let (conn, adapter) = setup();
        let err = adapter
            .upsert(&conn, &record(json!({"id": "O1", "bogus": 1})))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));

        let err = adapter
            .upsert(&conn, &record(json!({"status": "x"})))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
    }
}
