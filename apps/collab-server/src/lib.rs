//! Collaborative document server: one WebSocket endpoint for editors plus a
//! small HTTP API for inspection and out-of-band step submission.

pub mod api;
pub mod config;
pub mod ws;

use axum::{routing::get, Router};
use collaboration::{LivenessSweeper, SyncEngine};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/document", get(api::get_document))
        .route("/document/steps", get(api::get_steps).post(api::post_steps))
        .route("/health", get(api::health))
        .route("/clients", get(api::get_clients))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Editors connect on either path
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .merge(api_routes())
        // Older editor frontends prefix the HTTP API with /api
        .nest("/api", api_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves, sweeping dead connections meanwhile.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<SyncEngine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let sweeper = LivenessSweeper::spawn(engine.clone());
    let app = router(AppState { engine });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    sweeper.shutdown().await;
    info!("Server stopped");
    Ok(())
}
