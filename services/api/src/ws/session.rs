//! Manages the WebSocket connection lifecycle for one conversation.

use super::{
    bridge::{SocketBridge, send_msg},
    protocol::{ClientMessage, ServerMessage},
};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use cadence_core::{ConversationController, ConversationHandle};
use futures_util::{
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Starts a conversation whose collaborators are all backed by this socket,
/// feeds every peer message into its event queue and stops it when the peer
/// goes away.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (socket_tx, socket_rx) = socket.split();
    let socket_tx_arc = Arc::new(Mutex::new(socket_tx));
    let bridge = SocketBridge::new(socket_tx_arc.clone());

    let handle = ConversationController::start(
        state.config.controller_config(),
        bridge.collaborators(&state.config.output_sinks),
    )
    .await;
    let session_id = handle.session_id();
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!("New WebSocket connection. Conversation started.");

    if send_msg(
        &mut *socket_tx_arc.lock().await,
        ServerMessage::Initialized { session_id },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
    } else {
        run_session(&handle, socket_rx, &socket_tx_arc).await;
    }

    match handle.stop().await {
        Ok(state) => info!(turn_id = state.turn_id, "Conversation finished."),
        Err(e) => error!(error = ?e, "Conversation terminated with error."),
    }
}

/// Forwards peer messages into the conversation until the socket closes.
async fn run_session(
    handle: &ConversationHandle,
    mut socket_rx: SplitStream<WebSocket>,
    socket_tx: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
) {
    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle.enqueue(msg.into()),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed client message.");
                    let reply = ServerMessage::Error {
                        message: format!("invalid message: {e}"),
                    };
                    if send_msg(&mut *socket_tx.lock().await, reply).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Binary(_)) => {
                warn!("Received binary frame; only JSON text messages are supported.");
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        }
    }
}
