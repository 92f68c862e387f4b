use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;
use which::which;

use crate::config::BackupJobConfig;
use crate::errors::{BackupError, Result};

fn find_pg_dump_executable(config: &BackupJobConfig) -> Result<PathBuf> {
    match &config.pg_dump_path {
        Some(path) => Ok(path.clone()),
        None => which("pg_dump").map_err(|e| {
            BackupError::DumpLaunch(format!(
                "pg_dump executable not found in PATH ({e}). \
                 Ensure PostgreSQL client tools are installed."
            ))
        }),
    }
}

/// Runs pg_dump in directory format against the configured database.
///
/// The password reaches the child only through `PGPASSWORD`, never as a
/// command-line argument. On non-zero exit the utility's entire error
/// stream is captured into the returned failure. Cancellation kills the
/// child process and reports a dump failure.
pub async fn dump_database(
    config: &BackupJobConfig,
    output_path: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let pg_dump = find_pg_dump_executable(config)?;

    info!(
        database = %config.database,
        output = %output_path.display(),
        "running pg_dump"
    );

    let mut child = Command::new(&pg_dump)
        .arg("--host")
        .arg(&config.host)
        .arg("--port")
        .arg(config.port.to_string())
        .arg("--username")
        .arg(&config.username)
        .arg("--dbname")
        .arg(&config.database)
        .arg("--no-password")
        .arg("--format")
        .arg("directory")
        .arg("--file")
        .arg(output_path)
        .env("PGPASSWORD", &config.password)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            BackupError::DumpLaunch(format!("failed to start {}: {e}", pg_dump.display()))
        })?;

    // Drain stderr concurrently so a chatty pg_dump cannot block on a
    // full pipe before exiting.
    let stderr_pipe = child.stderr.take();
    let stderr_reader = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr_pipe {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| {
                BackupError::DumpLaunch(format!("failed waiting for pg_dump: {e}"))
            })?;
            let stderr = stderr_reader.await.unwrap_or_default();
            if status.success() {
                info!(output = %output_path.display(), "pg_dump completed");
                Ok(())
            } else {
                Err(BackupError::DumpFailed { status, stderr })
            }
        }
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            Err(BackupError::DumpCancelled)
        }
    }
}
