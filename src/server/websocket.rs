//! WebSocket transport
//!
//! Devices and observers share one endpoint; a connection becomes a device's
//! handle only once it sends `device_info`.

use crate::error::RouteError;
use crate::server::connections::{OutboundMessage, Session};
use crate::server::transport::HubState;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: HubState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.outbound_buffer);
    let session = Arc::new(Session::new(tx));
    let conn_id = session.id;
    state.connections.add(session);

    info!(conn_id = %conn_id, connections = state.connections.count(), "Client connected");

    // Writer task: the only place that awaits on the socket sink
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender
                .send(Message::Text(msg.payload.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    state.router.connection_opened(conn_id);

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => state.router.handle_text(conn_id, text.as_str()),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => state.router.handle_text(conn_id, text),
                Err(_) => state.router.reject(conn_id, &RouteError::NotUtf8),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Handled automatically by axum
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Leave the directory first so the offline broadcast skips this socket
    let session = state.connections.remove(conn_id);
    let device = state.router.connection_closed(conn_id);
    send_task.abort();

    let duration_secs = session.map(|s| (Utc::now() - s.opened_at).num_seconds());
    debug!(conn_id = %conn_id, device = ?device, duration_secs = ?duration_secs, "Client disconnected");
}
