//! Backstop CLI Module
//! Command-line interface for backup, restore and audit operations

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "backstop")]
#[command(version)]
#[command(about = "Portable snapshots, safe restores and an audit trail for the ticketing store", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default backstop.config.json and create the catalog tables
    Init {
        /// Project name
        #[arg(short, long)]
        name: String,
    },

    /// Backup commands
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Audit log commands
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Retention scheduler commands
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },

    /// Start the API server and the retention scheduler
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Don't run the retention scheduler
        #[arg(long)]
        no_scheduler: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Create a manual backup
    Create {
        /// Write the artifact to this file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Store the artifact in the backup directory
        #[arg(long)]
        store: bool,
    },

    /// List stored backups
    List {
        /// Only automatic backups
        #[arg(long)]
        auto: bool,
    },

    /// Restore from an artifact file or a stored backup name
    Restore {
        /// Path to an artifact, or the name of a stored backup
        source: String,
    },

    /// Check a stored backup against its checksum
    Verify {
        /// Stored backup name
        name: String,
    },

    /// Delete automatic backups beyond the retention limit
    Prune,
}

#[derive(Subcommand, Debug)]
pub enum AuditAction {
    /// Show the most recent audit entries
    List {
        /// Maximum entries
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only entries for this entity type
        #[arg(long)]
        entity: Option<String>,

        /// Only entries for this entity id (with --entity)
        #[arg(long, requires = "entity")]
        id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchedulerAction {
    /// Perform one scheduled run now: automatic backup, then prune
    RunOnce,
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
