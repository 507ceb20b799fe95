// Backstop Engine - Core module structure
pub mod adapter;
pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod database;
pub mod identity;
pub mod restore;
pub mod retention;
pub mod schema;
pub mod service;
pub mod snapshot;

pub use config::Config;
pub use database::Database;
pub use service::{Backstop, ServiceError};
