//! End-to-end pipeline tests using executable shell scripts in place of
//! the real `pg_dump`.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use pg_backup_tool::backup;
use pg_backup_tool::config::{BackupJobConfig, BackupLocation, RemoteStorageConfig};
use pg_backup_tool::errors::FailedStage;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("pg_dump");
    let mut file = std::fs::File::create(&path).expect("create script");
    writeln!(file, "#!/bin/sh").expect("shebang");
    writeln!(file, "{body}").expect("body");
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

// Creates the --file target directory with a couple of payload files,
// like a directory-format pg_dump would.
fn fake_pg_dump_success(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "for arg; do out=\"$arg\"; done\n\
         mkdir -p \"$out/b\"\n\
         printf x > \"$out/a.txt\"\n\
         printf y > \"$out/b/c.txt\"",
    )
}

fn config(pg_dump: PathBuf, output_path: PathBuf) -> BackupJobConfig {
    BackupJobConfig {
        host: "localhost".into(),
        port: 5432,
        username: "postgres".into(),
        password: "secret".into(),
        database: "appdb".into(),
        output_path,
        backup_location: BackupLocation::Local,
        remote_storage: None,
        pg_dump_path: Some(pg_dump),
    }
}

fn list_by_extension(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").path())
        .filter(|path| path.to_string_lossy().ends_with(suffix))
        .collect()
}

#[tokio::test]
async fn existing_output_path_fails_validation_without_launching_pg_dump() {
    let root = tempfile::tempdir().expect("tempdir");
    let marker = root.path().join("launched");
    let script = write_script(
        root.path(),
        &format!("touch {}", marker.display()),
    );
    let output = root.path().join("backup1");
    std::fs::create_dir(&output).expect("pre-existing output dir");

    let result = backup::run(&config(script, output), CancellationToken::new()).await;
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failed_stage(), Some(FailedStage::Validation));
    assert!(!marker.exists(), "pg_dump must not have been launched");
}

#[tokio::test]
async fn dump_failure_produces_no_archive() {
    let root = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        root.path(),
        "echo 'pg_dump: error: could not connect' >&2\nexit 1",
    );
    let output = root.path().join("backup1");

    let result = backup::run(&config(script, output), CancellationToken::new()).await;
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failed_stage(), Some(FailedStage::Dump));
    assert!(list_by_extension(root.path(), ".tar.gz").is_empty());
}

#[tokio::test]
async fn local_run_leaves_exactly_one_archive_and_no_dump_dir() {
    let root = tempfile::tempdir().expect("tempdir");
    let script = fake_pg_dump_success(root.path());
    let output = root.path().join("backup1");

    let result = backup::run(&config(script, output.clone()), CancellationToken::new()).await;
    assert!(result.is_success(), "run failed: {result:?}");
    assert_eq!(result.failed_stage(), None);

    assert!(!output.exists(), "dump directory must be removed");
    let archives = list_by_extension(root.path(), ".tar.gz");
    assert_eq!(archives.len(), 1, "expected one archive, got {archives:?}");
    let name = archives[0]
        .file_name()
        .and_then(|n| n.to_str())
        .expect("archive name");
    assert!(name.starts_with("backup1_"));
    // The transient uncompressed tar is gone.
    assert!(list_by_extension(root.path(), ".tar").is_empty());
}

#[tokio::test]
async fn failed_upload_retains_local_archive() {
    let root = tempfile::tempdir().expect("tempdir");
    let script = fake_pg_dump_success(root.path());
    let output = root.path().join("backup1");

    let mut config = config(script, output.clone());
    config.backup_location = BackupLocation::RemoteObjectStore;
    config.remote_storage = Some(RemoteStorageConfig {
        endpoint_url: "http://127.0.0.1:9".into(),
        bucket_name: "backups".into(),
        region: None,
    });

    let result = backup::run(&config, CancellationToken::new()).await;
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failed_stage(), Some(FailedStage::Upload));

    assert!(!output.exists(), "dump directory is removed before upload");
    let archives = list_by_extension(root.path(), ".tar.gz");
    assert_eq!(archives.len(), 1, "archive must survive a failed upload");
}

#[tokio::test]
async fn cancellation_during_dump_returns_promptly_without_archive() {
    let root = tempfile::tempdir().expect("tempdir");
    let script = write_script(root.path(), "sleep 30");
    let output = root.path().join("backup1");

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = backup::run(&config(script, output), cancel).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failed_stage(), Some(FailedStage::Dump));
    assert!(list_by_extension(root.path(), ".tar.gz").is_empty());
}
