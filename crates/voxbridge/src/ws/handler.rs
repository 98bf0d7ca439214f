//! WebSocket handler for client connections.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};

use voxbridge_protocol::client::{ClientCommand, ServerEvent};

use crate::api::AppState;
use crate::error::SessionError;

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (mut event_rx, conn_id) = state.hub.register();

    // Send pump: per-connection events out, plus protocol-level keepalive.
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("failed to serialize event: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound loop.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => handle_command(&state, conn_id, cmd).await,
                Err(e) => {
                    // Malformed or unknown payloads are answered, not
                    // dropped; the connection stays open.
                    warn!("invalid message from connection {conn_id}: {e}");
                    let err = SessionError::MalformedClientMessage(e.to_string());
                    state
                        .hub
                        .send_to(
                            conn_id,
                            ServerEvent::Error {
                                message: err.to_string(),
                            },
                        )
                        .await;
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("ignoring binary frame from connection {conn_id}");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("connection {conn_id} closed by client");
                break;
            }
            Err(e) => {
                warn!("websocket error on connection {conn_id}: {e}");
                break;
            }
        }
    }

    send_task.abort();
    state.hub.unregister(conn_id);
    info!("websocket connection {conn_id} finished");
}

/// Route one client command.
async fn handle_command(state: &AppState, conn_id: usize, cmd: ClientCommand) {
    match cmd {
        ClientCommand::StartSession => {
            if let Err(e) = state.session.start().await {
                // Spawn failures were already reported to everyone via
                // `status`; answer the requester directly as well.
                state
                    .hub
                    .send_to(
                        conn_id,
                        ServerEvent::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
            }
        }

        ClientCommand::StopSession => {
            state.session.stop().await;
        }

        ClientCommand::VoiceCommand { transcript } => {
            info!("voice command from connection {conn_id}: {transcript:?}");
            state
                .hub
                .send_to(
                    conn_id,
                    ServerEvent::Status {
                        message: "Sending to assistant...".to_string(),
                    },
                )
                .await;
            if let Err(e) = state.session.submit(&transcript).await {
                state
                    .hub
                    .send_to(
                        conn_id,
                        ServerEvent::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
            }
        }

        ClientCommand::GetHistory => {
            let messages = state.history.snapshot().await;
            state
                .hub
                .send_to(conn_id, ServerEvent::History { messages })
                .await;
        }

        ClientCommand::ClearHistory => {
            // Served straight from the store; the session is untouched.
            state.history.clear().await;
            state.hub.broadcast(ServerEvent::HistoryCleared).await;
        }
    }
}
