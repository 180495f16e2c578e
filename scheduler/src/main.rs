// Scheduler service entry point

use common::config::Settings;
use common::logging::{LogConfig, Logger};
use common::notify::Notifier;
use common::scheduler::Scheduler;
use common::secrets::CredentialCipher;
use common::store::{MemoryStore, Store};
use common::transfer::{verify_rclone, CommandRunner, RcloneRunner, TransferExecutor};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    let logger = Logger::init(&LogConfig::from_settings(&settings))?;

    info!("Starting GoMFT scheduler");
    info!(
        data_dir = %settings.data_dir,
        logs_dir = %settings.logs_dir().display(),
        rclone_path = %settings.rclone_path,
        "Configuration loaded"
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cipher = CredentialCipher::new(settings.gomft_encryption_key.as_deref())?;

    let runner: Arc<dyn CommandRunner> = Arc::new(RcloneRunner);
    match verify_rclone(runner.as_ref(), &settings.rclone_path).await {
        Some(version) => info!(version, "rclone binary verified"),
        None => warn!(path = %settings.rclone_path, "rclone binary not reachable"),
    }

    let notifier = Arc::new(Notifier::new(Arc::clone(&store)));
    let transfer = Arc::new(TransferExecutor::new(
        Arc::clone(&store),
        runner,
        Arc::clone(&notifier),
        cipher,
        settings.rclone_path.clone(),
    ));

    let scheduler = Scheduler::new(
        store,
        transfer,
        notifier,
        logger,
        settings.shutdown_grace_seconds,
    )
    .await?;
    info!("Scheduler started; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    scheduler.stop().await;

    Ok(())
}
