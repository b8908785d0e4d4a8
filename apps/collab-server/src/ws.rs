use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use collaboration::{ChannelTransport, CollaborationError, SyncEngine};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<SyncEngine>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (transport, mut rx) = ChannelTransport::new();

    // Writer task. When it exits the channel closes and the sweeper sees a dead transport.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(json)).await {
                debug!("Failed to send message to WebSocket: {}", e);
                break;
            }
        }
    });

    let id = match engine.admit(Arc::new(transport)) {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to admit connection: {}", e);
            send_task.abort();
            return;
        }
    };
    info!("WebSocket connection established: {}", id);

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match engine.handle_text(id, &text) {
                Ok(()) => {}
                Err(CollaborationError::ConnectionNotFound(_)) => {
                    debug!("Connection {} was already evicted", id);
                    break;
                }
                Err(e) => debug!("Message from {} not applied: {}", id, e),
            },
            Ok(Message::Binary(data)) => {
                debug!("Ignoring binary message ({} bytes) from {}", data.len(), id);
            }
            // Protocol-level pings are answered by the socket itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by client {}", id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error for client {}: {}", id, e);
                break;
            }
        }
    }

    engine.remove(id);
    send_task.abort();
    info!("WebSocket disconnected: {}", id);
}
