//! Daemon command: run the polling scheduler until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use inboxbot_ews::{EwsClient, EwsConfig};
use inboxbot_scheduler::{AccountStore, Scheduler, SchedulerConfig};
use inboxbot_store::SqliteAccountStore;
use inboxbot_telegram::{TelegramClient, TelegramConfig};

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub ews: EwsConfig,
    pub telegram: TelegramConfig,
    pub scheduler: SchedulerConfig,
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    let store = Arc::new(SqliteAccountStore::open(&config.db_path).map_err(|e| {
        miette::miette!(
            "failed to open account database {}: {}",
            config.db_path.display(),
            e
        )
    })?);
    let backend = Arc::new(
        EwsClient::new(config.ews).map_err(|e| miette::miette!("failed to create EWS client: {}", e))?,
    );
    let sink = Arc::new(
        TelegramClient::new(&config.telegram)
            .map_err(|e| miette::miette!("failed to create Telegram client: {}", e))?,
    );

    match store.count_active() {
        Ok(0) => warn!("no active accounts yet; idling until one is registered"),
        Ok(count) => info!(active_accounts = count, "starting daemon"),
        Err(e) => warn!(error = %e, "could not count active accounts"),
    }

    let scheduler = Scheduler::new(store, backend, sink, config.scheduler);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    scheduler_handle
        .await
        .map_err(|e| miette::miette!("scheduler task failed: {}", e))?;

    info!("daemon shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
