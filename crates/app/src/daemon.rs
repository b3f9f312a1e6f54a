//! `tallyd` wiring: store, ingestion, monitor and the IPC front end.

use std::sync::Arc;

use tally_aggregator::{DryRunSubmitter, Monitor, SubmissionHandler};
use tally_ipc::{IpcHandler, IpcServer};
use tally_store::{IdempotencyStore, MemoryStore, RedisStore};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::TallySettings;
use crate::rpc::TallyRpc;
use crate::{App, AppError};

/// Open the configured store: Redis when a URL is set, memory otherwise.
pub async fn open_store(settings: &TallySettings) -> Result<Arc<dyn IdempotencyStore>, AppError> {
    match &settings.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            info!("connected to redis store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no redis_url configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run the daemon until Ctrl-C.
pub async fn run(app: App<TallySettings>) -> Result<(), AppError> {
    let settings = &app.settings.config;
    let policy = settings.finalization_policy()?;
    info!(policy = %policy.describe(), "finalization policy");
    let store = open_store(settings).await?;

    let allowlist = settings.allowlist()?;
    if allowlist.is_empty() {
        warn!("no operators configured, every submission will be rejected");
    }
    let submissions = Arc::new(SubmissionHandler::new(
        settings.ingest_config(),
        store.clone(),
        Arc::new(allowlist),
    ));

    let monitor = Monitor::new(
        settings.monitor_config(),
        store,
        policy,
        Arc::new(DryRunSubmitter::new()),
    );
    monitor.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let server = IpcServer::new(&settings.socket_path(&app.service));
    let rpc: Arc<dyn IpcHandler> = Arc::new(TallyRpc::new(submissions));
    info!(network = %settings.network_id, "tallyd ready");
    server.run(rpc, shutdown_rx).await?;

    if let Err(e) = monitor_task.await {
        error!(error = %e, "monitor task failed");
    }
    info!("tallyd stopped");
    Ok(())
}
