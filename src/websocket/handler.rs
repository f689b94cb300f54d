use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::connection_manager::{ConnectionTransport, TransportHandle};
use crate::server::AppState;

use super::message::{ClientMessage, ServerMessage};
use super::ChannelTransport;

const CHANNEL_BUFFER_SIZE: usize = 32;

/// Owner id set by the authenticating edge in front of this service
pub const USER_ID_HEADER: &str = "x-user-id";

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, headers))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let user_id = extract_user_id(&headers);
    tracing::debug!(user_id = ?user_id, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

fn extract_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let connection_start = std::time::Instant::now();

    let (transport, mut rx) = ChannelTransport::new(CHANNEL_BUFFER_SIZE);
    let handle: TransportHandle = transport.clone();
    let connection_id = transport.connection_id().to_string();

    if !state.coordinator.add_connection(&handle, user_id.as_deref()) {
        tracing::warn!(connection_id = %connection_id, "Connection rejected");
        let (mut ws_sender, _) = socket.split();
        let error_msg = ServerMessage::error(
            "CONNECTION_REJECTED",
            "Server cannot accept new connections right now",
        );
        if let Ok(json) = serde_json::to_string(&error_msg) {
            let _ = ws_sender.send(Message::Text(json.into())).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    tracing::info!(
        connection_id = %connection_id,
        user_id = ?user_id,
        "WebSocket connection established"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel -> socket
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(into_frame(payload)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Socket -> control replies
    let recv_transport = transport.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_transport).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            send_task.abort();
        }
    }

    transport.close();
    state
        .coordinator
        .remove_connection(&handle, user_id.as_deref());

    tracing::info!(
        connection_id = %connection_id,
        user_id = ?user_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// UTF-8 payloads go out as text frames, anything else as binary
fn into_frame(payload: Vec<u8>) -> Message {
    match String::from_utf8(payload) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, transport: &Arc<ChannelTransport>) -> bool {
    match msg {
        Message::Text(text) => {
            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => ServerMessage::Pong,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    ServerMessage::error("INVALID_MESSAGE", e.to_string())
                }
            };
            reply_with(transport, &reply).await;
            true
        }
        Message::Binary(_) => {
            reply_with(
                transport,
                &ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported"),
            )
            .await;
            true
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %transport.connection_id(), "Received close frame");
            false
        }
    }
}

async fn reply_with(transport: &ChannelTransport, message: &ServerMessage) {
    match serde_json::to_vec(message) {
        Ok(payload) => {
            if let Err(e) = transport.send(&payload).await {
                tracing::debug!(connection_id = %transport.connection_id(), error = %e, "Failed to send reply");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
    }
}
