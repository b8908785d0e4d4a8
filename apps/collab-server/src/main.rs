use clap::Parser;
use collab_server::ServerConfig;
use collaboration::SyncEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("collab_server=debug,collaboration=debug")),
        )
        .init();

    let engine = Arc::new(SyncEngine::new(config.sync_config()));

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "Collaboration server listening on {} ({} protocol, version {})",
        addr,
        config.protocol,
        engine.version()
    );
    info!("WebSocket endpoint: ws://{}/ws", addr);
    info!("API endpoints:");
    info!("  GET  /document             - Current document");
    info!("  GET  /document/steps       - Steps since a version");
    info!("  POST /document/steps       - Submit a step batch");
    info!("  GET  /health               - Health check");
    info!("  GET  /clients              - Connected clients");
    info!("  (also served under /api)");

    collab_server::serve(listener, engine, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
