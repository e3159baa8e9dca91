//! Unix-socket HTTP server for the helper daemon (spec §4.3).
//!
//! Binds a `UnixListener`, sets directory and socket permissions, then serves
//! the axum router over each accepted connection with the connecting
//! process's `SO_PEERCRED` attached as a request extension so route
//! middleware can authorize by peer uid.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::UnixListener;

use crate::peer;
use crate::state::SharedHelperState;

pub async fn serve(state: SharedHelperState, router: axum::Router) -> anyhow::Result<()> {
    let socket_path = state.config.socket_path.clone();
    if std::path::Path::new(&socket_path).exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let socket_dir = state.config.socket_dir();
    std::fs::create_dir_all(&socket_dir)?;
    std::fs::set_permissions(
        &socket_dir,
        std::fs::Permissions::from_mode(state.config.socket_dir_mode),
    )?;

    let listener = UnixListener::bind(&socket_path)?;
    std::fs::set_permissions(
        &socket_path,
        std::fs::Permissions::from_mode(state.config.socket_mode),
    )?;
    tracing::info!(path = %socket_path, "helper daemon listening");

    let router = Arc::new(router);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        continue;
                    }
                };
                let cred = match peer::peer_cred(&stream) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!("failed to read peer credentials: {e}");
                        continue;
                    }
                };
                let router = router.clone();
                tokio::spawn(async move {
                    let svc = router
                        .as_ref()
                        .clone()
                        .layer(tower_http::add_extension::AddExtensionLayer::new(cred));
                    let io = TokioIo::new(stream);
                    let hyper_svc = TowerToHyperService::new(svc);
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, hyper_svc)
                        .await
                    {
                        tracing::debug!("connection closed with error: {e}");
                    }
                });
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
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
        _ = ctrl_c => tracing::info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown"),
    }
}
