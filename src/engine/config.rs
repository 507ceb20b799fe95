//! Backstop Configuration Module
//! Handles loading and saving backstop.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "backstop.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub project: ProjectConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backups: BackupsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupsConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_retain_automatic")]
    pub retain_automatic: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStoreKind {
    #[default]
    Sqlite,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub store: AuditStoreKind,
    /// JSONL log location; unused by the sqlite store
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default = "default_restore_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_retain_automatic() -> usize {
    3
}

fn default_interval_secs() -> u64 {
    86_400
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("./audit/audit.jsonl")
}

fn default_restore_timeout_secs() -> u64 {
    300
}

fn default_port() -> u16 {
    54330
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            retain_automatic: default_retain_automatic(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            store: AuditStoreKind::default(),
            path: default_audit_path(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_restore_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_project(name: &str) -> Self {
        Self {
            version: "0.3.0".to_string(),
            project: ProjectConfig {
                name: name.to_string(),
                id: format!("backstop-{}", name),
            },
            database: DatabaseConfig {
                path: PathBuf::from("./data/app.db"),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            backups: BackupsConfig::default(),
            audit: AuditConfig::default(),
            restore: RestoreConfig::default(),
            api: ApiConfig::default(),
        }
    }

    /// Resolve a configured path against the project directory
    pub fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_dir.join(path)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn restore_timeout(&self) -> Option<Duration> {
        (self.restore.timeout_secs > 0).then(|| Duration::from_secs(self.restore.timeout_secs))
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backups.interval_secs.max(1))
    }
}
