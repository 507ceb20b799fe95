//! Backstop Database Module
//! SQLite connection pool with per-connection pragmas

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::engine::schema::catalog;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
}

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(db_path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        // foreign_keys is per connection in SQLite, so every pooled connection gets it
        let manager = SqliteConnectionManager::file(db_path).with_init(move |c| {
            c.busy_timeout(busy_timeout)?;
            c.execute_batch("PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// since dropping it would drop the data.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        Ok(Self { pool })
    }

    fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.pool.get()?;
        // Enable WAL mode so snapshot reads don't block writers (PRAGMA returns result, use query)
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(())
    }

    pub fn get_connection(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool.get()?)
    }

    /// Create every catalog table that doesn't exist yet
    pub fn ensure_catalog(&self) -> Result<(), DatabaseError> {
        self.execute_ddl(&catalog::ddl())
    }

    pub fn execute_ddl(&self, sql: &str) -> Result<(), DatabaseError> {
        let conn = self.get_connection()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn get_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '_backstop_%' AND name NOT LIKE 'sqlite_%' ORDER BY name"
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tables)
    }

    pub fn row_count(&self, table: &str) -> Result<u64, DatabaseError> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_catalog_tables_created() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("data/app.db")).unwrap();
        db.ensure_catalog().unwrap();

        let tables = db.get_tables().unwrap();
        for name in ["User", "Seller", "Event", "Ticket", "EventStats"] {
            assert!(tables.contains(&name.to_string()), "missing {name}");
        }
        assert_eq!(db.row_count("Event").unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_enforced_on_every_connection() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("app.db")).unwrap();
        db.ensure_catalog().unwrap();

        let a = db.get_connection().unwrap();
        let b = db.get_connection().unwrap();
        for conn in [&a, &b] {
            let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
            assert_eq!(on, 1);
        }

        let err = a.execute(
            "INSERT INTO \"Event\" (id, sellerId, title, createdAt) VALUES ('E1', 'missing', 't', 'now')",
            [],
        );
        assert!(err.is_err());
    }
}
