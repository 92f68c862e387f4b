use std::path::Path;

use aws_config::retry::RetryConfig;
use aws_sdk_s3 as s3;
use aws_smithy_types::error::display::DisplayErrorContext;
use s3::config::Region;
use s3::primitives::ByteStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RemoteStorageConfig;
use crate::errors::{BackupError, Result};

const DEFAULT_REGION: &str = "us-east-1";

/// Uploads the finished archive to the configured object store.
///
/// The destination key is the archive's base name; an existing object of
/// that name is overwritten. Credentials come from the SDK default
/// provider chain (environment, shared profile, container/instance
/// identity). Single-shot: retries are disabled and cancellation aborts
/// the transfer.
pub async fn upload_archive(
    remote: &RemoteStorageConfig,
    archive_path: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let key = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            BackupError::UploadFailed(format!(
                "archive path '{}' has no usable file name",
                archive_path.display()
            ))
        })?
        .to_owned();

    info!(
        bucket = %remote.bucket_name,
        key = %key,
        endpoint = %remote.endpoint_url,
        "uploading archive"
    );

    let region = Region::new(
        remote
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
    );
    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(&remote.endpoint_url)
        .region(region)
        .retry_config(RetryConfig::disabled())
        .load()
        .await;
    let client = s3::Client::new(&sdk_config);

    let body = ByteStream::from_path(archive_path).await.map_err(|e| {
        BackupError::UploadFailed(format!(
            "failed to read archive {}: {}",
            archive_path.display(),
            DisplayErrorContext(&e)
        ))
    })?;

    let put = client
        .put_object()
        .bucket(&remote.bucket_name)
        .key(&key)
        .body(body)
        .send();

    tokio::select! {
        result = put => {
            result.map_err(|e| {
                BackupError::UploadFailed(format!(
                    "put_object of '{}' to bucket '{}' failed: {}",
                    key,
                    remote.bucket_name,
                    DisplayErrorContext(&e)
                ))
            })?;
            info!(bucket = %remote.bucket_name, key = %key, "upload complete");
            Ok(())
        }
        _ = cancel.cancelled() => Err(BackupError::UploadCancelled),
    }
}
