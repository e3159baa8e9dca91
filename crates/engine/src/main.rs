use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use engine::config::EngineConfig;
use engine::container::pct::PctContainerManager;
use engine::helper_client::HelperClient;
use engine::job::engine::JobEngine;
use engine::manifest::FsManifestSource;
use engine::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load()?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting docktail-engined");

    let store = Store::connect(&config.store.database_path, config.store.max_connections).await?;
    let helper_client = HelperClient::new(&config.helper);
    let container = Arc::new(PctContainerManager::new(helper_client));
    let manifests = Arc::new(FsManifestSource { root: std::path::PathBuf::from("/var/lib/docktail/manifests") });
    let scratch_dir = std::path::PathBuf::from("/var/lib/docktail/scratch");
    std::fs::create_dir_all(&scratch_dir)?;

    let engine = JobEngine::new(store, container, manifests, config.worker.clone(), scratch_dir);
    engine.spawn_workers();

    tracing::info!(pool_size = config.worker.pool_size, "worker pool started");

    shutdown_signal().await;
    tracing::info!("shutdown signal received; workers will drain in-flight jobs and stop pulling new ones");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
