//! WebSocket endpoint of the streaming relay.
//!
//! Each connection runs in its own task. Messages from the client are parsed
//! into [`StreamMessage`]s and applied to the [`RelayHub`](crate::relay::RelayHub);
//! messages for the client arrive through the connection's bounded outbox.
//!
//! - Sends heartbeat pings every `relay.heartbeatSeconds`
//! - Closes the connection after 3 missed pongs
//! - Answers rejected or malformed messages with an `error` event

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use proctor_model::{SessionStatus, StreamMessage, StreamingPayload};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::identity::CallerIdentity;
use crate::relay::{ConnectionId, FrameOutcome, Outbox};

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    caller: CallerIdentity,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(caller = %caller.id(), "New relay connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, caller, state))
}

async fn handle_socket(socket: WebSocket, caller: CallerIdentity, state: Arc<AppState>) {
    let conn = state.relay.connect();
    let (outbox, mut outbox_rx) = mpsc::channel(state.config.relay.outbox_capacity);
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat_interval = interval(Duration::from_secs(state.config.relay.heartbeat_seconds));
    let mut missed_pongs = 0u8;

    info!(conn = %conn, caller = %caller.id(), "Relay connection opened");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, conn, &caller, &outbox, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!(conn = %conn, "Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(conn = %conn, "Ignoring binary message");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(conn = %conn, "Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(conn = %conn, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!(conn = %conn, "WebSocket stream ended");
                        break;
                    }
                }
            }
            Some(message) = outbox_rx.recv() => {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize {} event: {}", message.event_name(), e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    debug!(conn = %conn, "Failed to send event, client disconnected");
                    break;
                }
            }
            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!(conn = %conn, "Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(conn = %conn, "Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    state.relay.disconnect(conn);
    info!(conn = %conn, caller = %caller.id(), "Relay connection closed");
}

/// Queues an `error` event for the client.
fn reject(outbox: &Outbox, conn: ConnectionId, message: impl Into<String>) {
    let message = message.into();
    debug!(conn = %conn, reason = %message, "Rejecting relay message");
    // Dropped when the outbox is full.
    let _ = outbox.try_send(StreamMessage::error(message));
}

async fn handle_text(
    state: &AppState,
    conn: ConnectionId,
    caller: &CallerIdentity,
    outbox: &Outbox,
    text: &str,
) {
    let message: StreamMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            reject(outbox, conn, format!("Malformed message: {e}"));
            return;
        }
    };

    match message {
        StreamMessage::StartStreaming(payload) => {
            start_streaming(state, conn, caller, outbox, payload).await;
        }
        StreamMessage::Frame(frame) => match state.relay.forward_frame(conn, frame) {
            FrameOutcome::Forwarded(_) | FrameOutcome::TooLarge => {}
            FrameOutcome::NotPublisher => {
                debug!(conn = %conn, "Frame from a connection that is not publishing");
            }
        },
        StreamMessage::StopStreaming(payload) => {
            state.relay.stop_streaming(conn, &payload.session_id);
        }
        StreamMessage::Watch(payload) => {
            match state.coordinator.session(&payload.session_id).await {
                Ok(session) if session.status == SessionStatus::Active => {
                    if state
                        .relay
                        .watch(conn, &session.id, caller.id(), outbox.clone())
                        .is_none()
                    {
                        reject(outbox, conn, format!("Session '{}' has ended", session.id));
                    }
                }
                Ok(session) => reject(
                    outbox,
                    conn,
                    format!("Session '{}' is {}", session.id, session.status),
                ),
                Err(e) => reject(outbox, conn, e.to_string()),
            }
        }
        StreamMessage::Unwatch(payload) => {
            state.relay.unwatch(conn, &payload.session_id);
        }
        other => reject(
            outbox,
            conn,
            format!("Unexpected event '{}' from client", other.event_name()),
        ),
    }
}

async fn start_streaming(
    state: &AppState,
    conn: ConnectionId,
    caller: &CallerIdentity,
    outbox: &Outbox,
    payload: StreamingPayload,
) {
    if payload.candidate_id != caller.id() {
        reject(outbox, conn, "candidateId does not match the caller");
        return;
    }

    let session = match state.coordinator.session(&payload.session_id).await {
        Ok(session) => session,
        Err(e) => {
            reject(outbox, conn, e.to_string());
            return;
        }
    };

    if session.candidate_id != caller.id() {
        warn!(
            session_id = %session.id,
            caller = %caller.id(),
            "Refusing publisher that does not own the session"
        );
        reject(outbox, conn, "Only the session's candidate may publish");
        return;
    }
    if session.status != SessionStatus::Active {
        reject(
            outbox,
            conn,
            format!("Session '{}' is {}", session.id, session.status),
        );
        return;
    }

    if !state
        .relay
        .start_streaming(conn, &session.id, caller.id(), outbox.clone())
    {
        reject(outbox, conn, format!("Session '{}' has ended", session.id));
    }
}
