use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use flate2::Compression;
use flate2::write::GzEncoder;
use tar::Builder;
use tokio_util::sync::CancellationToken;
use tracing::info;
use walkdir::WalkDir;

use crate::errors::{BackupError, Result};

const COPY_CHUNK: usize = 64 * 1024;

/// Derives the `.tar` and `.tar.gz` sibling paths for a dump directory
/// and a timestamp taken at archive start.
pub fn derive_archive_paths(dir: &Path, stamp: &str) -> Result<(PathBuf, PathBuf)> {
    let base = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            BackupError::Archive(format!(
                "dump directory path '{}' has no usable base name",
                dir.display()
            ))
        })?;
    let parent = dir.parent().map(Path::to_path_buf).unwrap_or_default();
    let tar_path = parent.join(format!("{base}_{stamp}.tar"));
    let gz_path = parent.join(format!("{base}_{stamp}.tar.gz"));
    Ok((tar_path, gz_path))
}

/// Packs the dump directory into `<dir>_<timestamp>.tar.gz`.
///
/// Two-phase: the full uncompressed tar is written to a sibling `.tar`
/// file first, then gzip-compressed into the final `.tar.gz`. The
/// intermediate `.tar` is removed only after the `.tar.gz` is fully
/// written. On failure or cancellation nothing is cleaned up, so the
/// operator can inspect partial files.
pub async fn archive_directory(dir: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let dir = dir.to_path_buf();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || archive_directory_with_stamp(&dir, &stamp, &cancel))
        .await
        .map_err(|e| BackupError::Archive(format!("archive task failed: {e}")))?
}

/// Blocking body of the archive stage, split out so tests can pin the
/// timestamp.
pub fn archive_directory_with_stamp(
    dir: &Path,
    stamp: &str,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(BackupError::Archive(format!(
            "source for archival is not a directory: {}",
            dir.display()
        )));
    }
    let (tar_path, gz_path) = derive_archive_paths(dir, stamp)?;

    info!(archive = %gz_path.display(), "compressing backup");

    build_tar(dir, &tar_path, cancel)?;
    compress_tar(&tar_path, &gz_path, cancel)?;

    std::fs::remove_file(&tar_path).map_err(|e| {
        BackupError::Archive(format!(
            "failed to remove intermediate tar file {}: {e}",
            tar_path.display()
        ))
    })?;

    info!(archive = %gz_path.display(), "archive written");
    Ok(gz_path)
}

// Writes an uncompressed tar of `dir` to `tar_path`, with the base
// directory name as the archive's root entry. Cancellation is observed
// between entries.
fn build_tar(dir: &Path, tar_path: &Path, cancel: &CancellationToken) -> Result<()> {
    let base = dir
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| {
            BackupError::Archive(format!(
                "dump directory path '{}' has no base name",
                dir.display()
            ))
        })?;

    let tar_file = File::create(tar_path).map_err(|e| {
        BackupError::Archive(format!("failed to create tar file {}: {e}", tar_path.display()))
    })?;
    let mut builder = Builder::new(tar_file);

    for entry in WalkDir::new(dir) {
        if cancel.is_cancelled() {
            return Err(BackupError::ArchiveCancelled);
        }
        let entry = entry.map_err(|e| {
            BackupError::Archive(format!("failed to walk directory {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        let relative = path.strip_prefix(dir).map_err(|e| {
            BackupError::Archive(format!(
                "failed to strip prefix {} from {}: {e}",
                dir.display(),
                path.display()
            ))
        })?;
        let name = base.join(relative);

        if path.is_dir() {
            builder.append_dir(&name, path).map_err(|e| {
                BackupError::Archive(format!(
                    "failed to append directory {} to archive: {e}",
                    path.display()
                ))
            })?;
        } else {
            builder.append_path_with_name(path, &name).map_err(|e| {
                BackupError::Archive(format!(
                    "failed to append file {} to archive: {e}",
                    path.display()
                ))
            })?;
        }
    }

    let mut tar_file = builder.into_inner().map_err(|e| {
        BackupError::Archive(format!(
            "failed to finish tar archive {}: {e}",
            tar_path.display()
        ))
    })?;
    tar_file.sync_all().map_err(|e| {
        BackupError::Archive(format!("failed to flush tar file {}: {e}", tar_path.display()))
    })?;
    Ok(())
}

// Gzip-compresses the tar file with a chunked copy loop that checks
// the cancellation token on every chunk.
fn compress_tar(tar_path: &Path, gz_path: &Path, cancel: &CancellationToken) -> Result<()> {
    let mut input = File::open(tar_path).map_err(|e| {
        BackupError::Archive(format!("failed to open tar file {}: {e}", tar_path.display()))
    })?;
    let output = File::create(gz_path).map_err(|e| {
        BackupError::Archive(format!(
            "failed to create archive file {}: {e}",
            gz_path.display()
        ))
    })?;
    let mut encoder = GzEncoder::new(output, Compression::default());

    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        if cancel.is_cancelled() {
            return Err(BackupError::ArchiveCancelled);
        }
        let read = input.read(&mut buf).map_err(|e| {
            BackupError::Archive(format!("failed reading tar file {}: {e}", tar_path.display()))
        })?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buf[..read]).map_err(|e| {
            BackupError::Archive(format!(
                "failed writing compressed archive {}: {e}",
                gz_path.display()
            ))
        })?;
    }

    let output = encoder.finish().map_err(|e| {
        BackupError::Archive(format!(
            "failed to finish gzip encoding for {}: {e}",
            gz_path.display()
        ))
    })?;
    output.sync_all().map_err(|e| {
        BackupError::Archive(format!("failed to flush archive {}: {e}", gz_path.display()))
    })?;
    Ok(())
}
