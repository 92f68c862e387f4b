use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// The pipeline stage a failed run stopped at.
///
/// Conveyed through logs only; the process exit code stays a flat 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Validation,
    Dump,
    Archive,
    Cleanup,
    Upload,
}

/// Every way a backup run can fail, one variant per stage outcome.
///
/// Variant messages carry the full diagnostic text so a single log line
/// gives the operator everything the failing collaborator reported.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("output path validation failed: {0}")]
    Validation(String),

    #[error("failed to launch pg_dump: {0}")]
    DumpLaunch(String),

    /// pg_dump exited non-zero. `stderr` is the utility's error stream,
    /// verbatim and untruncated.
    #[error("pg_dump exited with {status}:\n{stderr}")]
    DumpFailed { status: ExitStatus, stderr: String },

    #[error("dump cancelled, pg_dump process terminated")]
    DumpCancelled,

    #[error("archive failed: {0}")]
    Archive(String),

    #[error("archiving cancelled, partial archive files left in place for inspection")]
    ArchiveCancelled,

    #[error("failed to remove dump directory {path}: {message}")]
    Cleanup { path: PathBuf, message: String },

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("upload cancelled, local archive retained")]
    UploadCancelled,
}

impl BackupError {
    /// Maps an error to the stage it failed in, for the run result.
    pub fn failed_stage(&self) -> FailedStage {
        match self {
            BackupError::Config(_) | BackupError::Validation(_) => FailedStage::Validation,
            BackupError::DumpLaunch(_)
            | BackupError::DumpFailed { .. }
            | BackupError::DumpCancelled => FailedStage::Dump,
            BackupError::Archive(_) | BackupError::ArchiveCancelled => FailedStage::Archive,
            BackupError::Cleanup { .. } => FailedStage::Cleanup,
            BackupError::UploadFailed(_) | BackupError::UploadCancelled => FailedStage::Upload,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
