//! Retention Module
//!
//! Where artifacts live and how long automatic ones are kept

pub mod scheduler;
pub mod store;

pub use scheduler::{
    RetentionPolicy, RetentionScheduler, RunOutcome, SchedulerError, SchedulerHandle,
};
pub use store::{BackupManifest, BackupStore, BackupStoreError};
