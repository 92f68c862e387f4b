use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pg_backup_tool::backup;
use pg_backup_tool::config::BackupJobConfig;

/// Entry point: resolve configuration, run the pipeline exactly once,
/// exit with its status.
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    let config = match BackupJobConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration from {}: {e:#}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    info!(config = ?config, "starting backup run");

    // One cancellation token for the whole run; Ctrl-C / SIGTERM trips
    // it and every stage observes it at its next suspension point.
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let result = backup::run(&config, cancel).await;
    ExitCode::from(result.exit_code())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("shutdown signal received, cancelling backup run");
                cancel.cancel();
            }
            Err(e) => warn!("failed to install shutdown signal handler: {e}"),
        }
    });
}
