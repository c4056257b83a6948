use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use rvb_core::types::DbId;
use rvb_events::EventBus;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;
use crate::ws::manager::WsManager;

/// Query parameters for the change feed.
#[derive(Debug, Deserialize)]
pub struct FeedParams {
    /// Restrict the feed to one lab. Without it the feed carries every
    /// event.
    pub lab_id: Option<DbId>,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsManager` and an
/// event-bus subscription is bridged onto it, filtered by `lab_id`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<FeedParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state.ws_manager, state.event_bus, params.lab_id)
    })
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a forwarder task pushing matching bus events onto the
///      connection channel.
///   3. Spawns a sender task draining the channel into the sink.
///   4. Processes inbound messages on the current task.
///   5. Cleans up on disconnect.
async fn handle_socket(
    socket: WebSocket,
    ws_manager: Arc<WsManager>,
    event_bus: Arc<EventBus>,
    lab_filter: Option<DbId>,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, lab_filter = ?lab_filter, "WebSocket connected");

    let (tx, mut rx) = ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Forwarder task: bridge bus events matching the lab filter onto the
    // connection channel.
    let mut bus_rx = event_bus.subscribe();
    let forward_conn_id = conn_id.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(event) if event.matches_lab(lab_filter) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if tx.send(Message::Text(Utf8Bytes::from(text))).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // Dropped events are re-observed by polling.
                    tracing::debug!(conn_id = %forward_conn_id, skipped, "WebSocket feed lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: process inbound messages.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_msg) => {
                // The feed is one-way; inbound frames are ignored.
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: remove connection and abort helper tasks.
    ws_manager.remove(&conn_id).await;
    forward_task.abort();
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
