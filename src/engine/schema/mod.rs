//! Schema Module
//!
//! Explicit entity registry and the ticketing catalog built on it

pub mod catalog;
pub mod registry;

pub use catalog::{EntityKind, SOFT_DELETE_COLUMN};
pub use registry::{EntityDescriptor, ForeignKey, SchemaError, SchemaRegistry};
