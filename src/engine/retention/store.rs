//! Backup Artifact Store
//!
//! A flat directory of snapshot artifacts. Names are deterministic and carry
//! everything the manifest needs:
//!
//! ```text
//! backup-auto-v1-20261016T020000.000Z.json
//! backup-auto-v1-20261016T020000.000Z.json.sha256
//! backup-manual-v1-20261016T093012.517Z.json
//! ```
//!
//! Writes go through a temp file and a rename, so a crash never leaves a
//! half-written artifact under a real name.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::snapshot::{BackupKind, Snapshot, SnapshotError};

const PREFIX: &str = "backup-";
const EXTENSION: &str = ".json";
const CHECKSUM_EXTENSION: &str = ".sha256";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

#[derive(Error, Debug)]
pub enum BackupStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a backup artifact name: {0}")]
    InvalidName(String),
    #[error("Backup {0} not found")]
    NotFound(String),
    #[error("Backup {0} already exists")]
    AlreadyExists(String),
    #[error("Backup {0} has no checksum")]
    MissingChecksum(String),
    #[error("Backup verification failed for {filename}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Metadata for a stored artifact, derived from its name and the filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub size_bytes: u64,
    pub kind: BackupKind,
}

/// Kind, schema version and timestamp encoded in an artifact name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub kind: BackupKind,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
}

pub fn artifact_filename(
    kind: BackupKind,
    schema_version: u32,
    created_at: DateTime<Utc>,
) -> String {
    format!(
        "{}{}-v{}-{}{}",
        PREFIX,
        kind.slug(),
        schema_version,
        created_at.format(TIMESTAMP_FORMAT),
        EXTENSION
    )
}

/// Parse an artifact name. Anything that doesn't round-trip exactly,
/// including names with path components, is rejected.
pub fn parse_filename(filename: &str) -> Option<ParsedName> {
    let stem = filename.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    let (slug, rest) = stem.split_once('-')?;
    let kind = BackupKind::from_slug(slug)?;
    let (version, timestamp) = rest.strip_prefix('v')?.split_once('-')?;
    let schema_version: u32 = version.parse().ok()?;
    let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();

    let parsed = ParsedName {
        kind,
        schema_version,
        created_at,
    };
    (artifact_filename(kind, schema_version, created_at) == filename).then_some(parsed)
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
}

impl BackupStore {
    pub fn open(backup_dir: &Path) -> Result<Self, BackupStoreError> {
        fs::create_dir_all(backup_dir)?;
        Ok(Self {
            backup_dir: backup_dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Encode and store a snapshot under its deterministic name
    pub fn save_snapshot(
        &self,
        kind: BackupKind,
        snapshot: &Snapshot,
    ) -> Result<BackupManifest, BackupStoreError> {
        let bytes = snapshot.to_bytes()?;
        self.write(kind, snapshot.schema_version, snapshot.created_at, &bytes)
    }

    /// Store raw artifact bytes plus their checksum sidecar
    pub fn write(
        &self,
        kind: BackupKind,
        schema_version: u32,
        created_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<BackupManifest, BackupStoreError> {
        let filename = artifact_filename(kind, schema_version, created_at);
        let path = self.backup_dir.join(&filename);
        if path.exists() {
            return Err(BackupStoreError::AlreadyExists(filename));
        }

        let checksum = sha256_hex(bytes);
        self.write_atomic(&format!("{}{}", filename, CHECKSUM_EXTENSION), |f| {
            writeln!(f, "{}  {}", checksum, filename)
        })?;
        self.write_atomic(&filename, |f| f.write_all(bytes))?;

        info!(%filename, size = bytes.len(), "backup stored");
        Ok(BackupManifest {
            filename,
            created_at,
            schema_version,
            size_bytes: bytes.len() as u64,
            kind,
        })
    }

    fn write_atomic(
        &self,
        filename: &str,
        fill: impl FnOnce(&mut File) -> std::io::Result<()>,
    ) -> Result<(), BackupStoreError> {
        let tmp = self.backup_dir.join(format!(".{}.tmp", filename));
        let mut file = File::create(&tmp)?;
        fill(&mut file)?;
        file.sync_all()?;
        fs::rename(&tmp, self.backup_dir.join(filename))?;
        Ok(())
    }

    /// All artifacts, newest first
    pub fn list(&self) -> Result<Vec<BackupManifest>, BackupStoreError> {
        let mut manifests = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(parsed) = parse_filename(name) else {
                continue;
            };
            if !entry.file_type()?.is_file() {
                continue;
            }

            manifests.push(BackupManifest {
                filename: name.to_string(),
                created_at: parsed.created_at,
                schema_version: parsed.schema_version,
                size_bytes: entry.metadata()?.len(),
                kind: parsed.kind,
            });
        }

        manifests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(manifests)
    }

    pub fn list_kind(&self, kind: BackupKind) -> Result<Vec<BackupManifest>, BackupStoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|m| m.kind == kind)
            .collect())
    }

    fn artifact_path(&self, filename: &str) -> Result<PathBuf, BackupStoreError> {
        if parse_filename(filename).is_none() {
            return Err(BackupStoreError::InvalidName(filename.to_string()));
        }
        let path = self.backup_dir.join(filename);
        if !path.is_file() {
            return Err(BackupStoreError::NotFound(filename.to_string()));
        }
        Ok(path)
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>, BackupStoreError> {
        Ok(fs::read(self.artifact_path(filename)?)?)
    }

    /// Read an artifact, refusing it if it no longer matches its checksum
    pub fn read_verified(&self, filename: &str) -> Result<Vec<u8>, BackupStoreError> {
        let bytes = self.read(filename)?;
        self.check_checksum(filename, &bytes)?;
        Ok(bytes)
    }

    pub fn verify(&self, filename: &str) -> Result<(), BackupStoreError> {
        self.read_verified(filename).map(|_| ())
    }

    fn check_checksum(&self, filename: &str, bytes: &[u8]) -> Result<(), BackupStoreError> {
        let sidecar = self
            .backup_dir
            .join(format!("{}{}", filename, CHECKSUM_EXTENSION));
        let content = match fs::read_to_string(&sidecar) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupStoreError::MissingChecksum(filename.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let expected = content.split_whitespace().next().unwrap_or_default().to_string();
        let actual = sha256_hex(bytes);
        if expected != actual {
            return Err(BackupStoreError::ChecksumMismatch {
                filename: filename.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Remove an artifact and its sidecar
    pub fn delete(&self, filename: &str) -> Result<(), BackupStoreError> {
        let path = self.artifact_path(filename)?;
        fs::remove_file(&path)?;

        let sidecar = self
            .backup_dir
            .join(format!("{}{}", filename, CHECKSUM_EXTENSION));
        match fs::remove_file(sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(%filename, "backup deleted");
        Ok(())
    }
}
