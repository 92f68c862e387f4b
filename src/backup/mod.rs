pub mod archive;
pub mod db_dump;
pub mod upload;

use std::fs;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{BackupJobConfig, BackupLocation};
use crate::errors::{BackupError, FailedStage, Result};

/// Outcome of one pipeline run, handed back to the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineRunResult {
    exit_code: u8,
    failed_stage: Option<FailedStage>,
}

impl PipelineRunResult {
    fn success() -> Self {
        PipelineRunResult {
            exit_code: 0,
            failed_stage: None,
        }
    }

    fn failure(stage: FailedStage) -> Self {
        PipelineRunResult {
            exit_code: 1,
            failed_stage: Some(stage),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn failed_stage(&self) -> Option<FailedStage> {
        self.failed_stage
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the backup pipeline: dump, archive, cleanup, optional upload.
///
/// Stages execute strictly in order and the first failure stops the run.
/// Every failure is logged here with its full diagnostic text and folded
/// into a `PipelineRunResult`; no error escapes to the caller, so the
/// process always terminates with a deterministic exit code.
pub async fn run(config: &BackupJobConfig, cancel: CancellationToken) -> PipelineRunResult {
    match execute(config, &cancel).await {
        Ok(()) => {
            info!("backup completed successfully");
            PipelineRunResult::success()
        }
        Err(err) => {
            let stage = err.failed_stage();
            error!(stage = ?stage, "backup failed: {err}");
            PipelineRunResult::failure(stage)
        }
    }
}

async fn execute(config: &BackupJobConfig, cancel: &CancellationToken) -> Result<()> {
    config.validate()?;

    // Validation stage: parent must exist, the path itself must not.
    let output_path = config.resolved_output_path()?;

    // Dump stage. pg_dump creates the directory; if something raced us
    // into creating it since validation, pg_dump itself fails and that
    // surfaces as a dump failure.
    db_dump::dump_database(config, &output_path, cancel).await?;

    // Archive stage. On failure the dump directory stays on disk for
    // inspection; cleanup only ever runs after a successful archive.
    let archive_path = archive::archive_directory(&output_path, cancel).await?;

    remove_dump_directory(&output_path)?;

    match config.backup_location {
        BackupLocation::Local => {}
        BackupLocation::RemoteObjectStore => {
            let remote = config.remote_storage.as_ref().ok_or_else(|| {
                BackupError::Config(
                    "backup_location is RemoteObjectStore but remote_storage is not configured"
                        .into(),
                )
            })?;
            // On failure the local archive is retained as a recovery path.
            upload::upload_archive(remote, &archive_path, cancel).await?;
        }
    }

    Ok(())
}

// A stale dump directory would break the next run's "must not already
// exist" precondition, so a failed deletion is fatal, not a warning.
fn remove_dump_directory(output_path: &Path) -> Result<()> {
    info!(path = %output_path.display(), "removing uncompressed dump directory");
    fs::remove_dir_all(output_path).map_err(|e| BackupError::Cleanup {
        path: output_path.to_path_buf(),
        message: e.to_string(),
    })
}
