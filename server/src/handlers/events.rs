//! WebSocket handler for the real-time event stream.
//!
//! The stream is one-way: every row accepted for the owner is forwarded as
//! a text frame. Text sent by the client is ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use marksync_engine::Bookmark;
use tokio::sync::mpsc;

use crate::websocket::ConnectionManager;

/// Handle an established WebSocket connection.
///
/// Registers the connection, forwards queued deltas until the client goes
/// away, then cleans up.
pub async fn handle_event_stream(
    socket: WebSocket,
    conn_manager: Arc<ConnectionManager>,
    owner: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bookmark>();
    let conn_id = conn_manager.register(owner.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        owner = %owner,
        "WebSocket client connected"
    );

    // Spawn task to forward deltas from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(row) = rx.recv().await {
            match serde_json::to_string(&row) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize delta: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                tracing::trace!(conn_id = %conn_id, "Ignoring client frame");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        owner = %owner,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}
