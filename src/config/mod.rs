use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::errors::BackupError;

/// Destination for the finished archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum BackupLocation {
    #[default]
    Local,
    RemoteObjectStore,
}

/// Connection details for an S3-compatible object store.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteStorageConfig {
    pub endpoint_url: String,
    pub bucket_name: String,
    /// Region passed to the SDK. Custom endpoints usually accept any
    /// value here; defaults to `us-east-1` when absent.
    #[serde(default)]
    pub region: Option<String>,
}

/// Fully-resolved configuration for one backup run.
///
/// Assembled once at startup and handed to the pipeline as an immutable
/// value; the pipeline never reaches back into files or the environment.
#[derive(Clone, Deserialize)]
pub struct BackupJobConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    pub output_path: PathBuf,
    #[serde(default)]
    pub backup_location: BackupLocation,
    #[serde(default)]
    pub remote_storage: Option<RemoteStorageConfig>,
    /// Overrides PATH lookup of the pg_dump executable.
    #[serde(default)]
    pub pg_dump_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    5432
}

// Manual Debug so the password can never leak into logs.
impl fmt::Debug for BackupJobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupJobConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("output_path", &self.output_path)
            .field("backup_location", &self.backup_location)
            .field("remote_storage", &self.remote_storage)
            .field("pg_dump_path", &self.pg_dump_path)
            .finish()
    }
}

impl BackupJobConfig {
    /// Loads the config from a JSON file, applies environment overrides
    /// for the password, and checks the cross-field invariants.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let mut config: BackupJobConfig = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        // The secret is expected from the environment (upstream secret
        // resolution); a password in the file still works.
        if let Ok(password) = env::var("PGBACKUP_PASSWORD").or_else(|_| env::var("PGPASSWORD")) {
            config.password = password;
        }

        config.validate().map_err(anyhow::Error::from)?;
        Ok(config)
    }

    /// Cross-field invariants that do not touch the filesystem.
    pub fn validate(&self) -> crate::errors::Result<()> {
        if self.host.trim().is_empty() {
            return Err(BackupError::Config("host must not be empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(BackupError::Config("username must not be empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(BackupError::Config("database must not be empty".into()));
        }
        match (self.backup_location, &self.remote_storage) {
            (BackupLocation::RemoteObjectStore, None) => Err(BackupError::Config(
                "backup_location is RemoteObjectStore but remote_storage is not configured".into(),
            )),
            (BackupLocation::Local, Some(_)) => Err(BackupError::Config(
                "remote_storage is configured but backup_location is Local".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Resolves `output_path` to an absolute path, enforcing the dump
    /// preconditions: the parent directory must exist and the path
    /// itself must not, so a prior backup is never silently overwritten.
    pub fn resolved_output_path(&self) -> crate::errors::Result<PathBuf> {
        let parent = match self.output_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(BackupError::Validation(format!(
                "the directory '{}' does not exist",
                parent.display()
            )));
        }
        if self.output_path.exists() {
            return Err(BackupError::Validation(format!(
                "the path '{}' already exists, refusing to overwrite a previous backup",
                self.output_path.display()
            )));
        }
        let file_name = self.output_path.file_name().ok_or_else(|| {
            BackupError::Validation(format!(
                "the path '{}' has no final component",
                self.output_path.display()
            ))
        })?;
        let absolute_parent = parent.canonicalize().map_err(|e| {
            BackupError::Validation(format!(
                "failed to resolve parent directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
        Ok(absolute_parent.join(file_name))
    }
}
