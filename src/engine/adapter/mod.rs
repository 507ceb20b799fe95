//! Entity Adapter Layer
//!
//! One adapter per registered entity type, all behind the same read/upsert
//! interface. Callers pick an adapter by entity name through [`AdapterSet`];
//! nothing inspects row types at runtime.

pub mod sqlite;
pub mod value;

pub use sqlite::SqliteEntityAdapter;
pub use value::SqlValue;

use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::schema::{EntityDescriptor, EntityKind, SchemaRegistry};

/// A row as an ordered field-value mapping
pub type Record = serde_json::Map<String, Value>;

/// Universal result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Shared per-entity data access contract.
///
/// Every method takes the connection to run on, so writes join whatever
/// transaction the caller has open on it (`rusqlite::Transaction` derefs to
/// `Connection`).
pub trait EntityAdapter: Send + Sync {
    fn descriptor(&self) -> &EntityDescriptor;

    /// Column names in export order
    fn columns(&self) -> &[String];

    /// All rows, ordered by primary key
    fn read_all(&self, conn: &Connection) -> AdapterResult<Vec<Record>>;

    fn find(&self, conn: &Connection, id: &Value) -> AdapterResult<Option<Record>>;

    /// Insert or fully replace the row with the record's primary key.
    /// Columns absent from the record are written as NULL.
    fn upsert(&self, conn: &Connection, record: &Record) -> AdapterResult<UpsertOutcome>;

    fn insert(&self, conn: &Connection, record: &Record) -> AdapterResult<()>;

    /// Overwrite only the given fields of an existing row
    fn patch(&self, conn: &Connection, id: &Value, fields: &Record) -> AdapterResult<u64>;

    fn delete(&self, conn: &Connection, id: &Value) -> AdapterResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Adapters for every entity of a registry, looked up by name
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<String, Arc<dyn EntityAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapters for the ticketing catalog
    pub fn for_catalog(registry: &SchemaRegistry) -> AdapterResult<Self> {
        let mut set = Self::new();
        for kind in EntityKind::ALL {
            let descriptor = registry
                .describe(kind.name())
                .map_err(|e| AdapterError::Schema(e.to_string()))?;
            set.register(SqliteEntityAdapter::new(descriptor.clone(), kind.columns())?);
        }
        Ok(set)
    }

    /// Adapters for an arbitrary registry given each entity's column list
    pub fn from_columns<'a>(
        registry: &SchemaRegistry,
        columns: impl IntoIterator<Item = (&'a str, &'a [&'a str])>,
    ) -> AdapterResult<Self> {
        let mut set = Self::new();
        for (name, cols) in columns {
            let descriptor = registry
                .describe(name)
                .map_err(|e| AdapterError::Schema(e.to_string()))?;
            set.register(SqliteEntityAdapter::new(descriptor.clone(), cols)?);
        }
        for d in registry.descriptors() {
            if !set.adapters.contains_key(&d.name) {
                return Err(AdapterError::Schema(format!("no columns given for {}", d.name)));
            }
        }
        Ok(set)
    }

    pub fn register<A: EntityAdapter + 'static>(&mut self, adapter: A) {
        self.adapters
            .insert(adapter.descriptor().name.clone(), Arc::new(adapter));
    }

    pub fn get(&self, entity: &str) -> AdapterResult<&dyn EntityAdapter> {
        self.adapters
            .get(entity)
            .map(|a| a.as_ref())
            .ok_or_else(|| AdapterError::NotFound(format!("no adapter for entity {}", entity)))
    }
}

/// Database adapter errors
#[derive(Debug)]
pub enum AdapterError {
    Query(String),
    Schema(String),
    NotFound(String),
    Validation(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Query(e) => write!(f, "Query error: {}", e),
            AdapterError::Schema(e) => write!(f, "Schema error: {}", e),
            AdapterError::NotFound(e) => write!(f, "Not found: {}", e),
            AdapterError::Validation(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<rusqlite::Error> for AdapterError {
    fn from(e: rusqlite::Error) -> Self {
        AdapterError::Query(e.to_string())
    }
}
