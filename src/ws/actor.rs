//! Actor-per-connection lifecycle for one accepted WebSocket.
//!
//! Splits the socket into reader and writer halves:
//! - Writer task: owns the sink, forwards messages from an mpsc channel
//! - Reader loop: records activity, dispatches frames in arrival order
//!
//! The mpsc sender is what the rest of the system clones to push messages
//! to this client. Per-client inbound ordering comes from the single reader
//! loop; there is no cross-client ordering guarantee.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::{Client, ClientState};
use crate::state::HubState;
use crate::ws::{close_message, protocol, CLOSE_AUTH_TIMEOUT};

/// Run the connection from accept to disconnect. The connection is accepted
/// before any identity check; the auth timer bounds how long an
/// unauthenticated peer may hold resources.
pub async fn run_connection(socket: WebSocket, state: HubState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let client_id = Uuid::new_v4().to_string();

    // Auth timer: fires unconditionally unless authentication succeeded.
    // Never reset — a slow or failed attempt does not grant extra time.
    let auth_timer = {
        let state = state.clone();
        let client_id = client_id.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(state.settings.auth_timeout).await;
            if state.registry.state_of(&client_id) != Some(ClientState::Authenticated) {
                tracing::warn!(client_id = %client_id, "authentication window expired");
                let _ = tx.send(close_message(CLOSE_AUTH_TIMEOUT, "Authentication timeout"));
            }
        })
    };

    state
        .registry
        .insert(Client::new(client_id.clone(), tx.clone(), auth_timer));

    // The client's own id is a singleton room used for direct addressing.
    state.rooms.join(&client_id, &client_id, true);

    tracing::debug!(client_id = %client_id, "connection accepted; awaiting authentication");

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    state.registry.touch(&client_id);
                    protocol::handle_frame(&state, &client_id, &tx, text.as_str()).await;
                }
                Message::Binary(_) => {
                    // The protocol is JSON text frames; binary still counts
                    // as liveness.
                    state.registry.touch(&client_id);
                    tracing::debug!(client_id = %client_id, "binary frame ignored");
                }
                Message::Ping(payload) => {
                    state.registry.touch(&client_id);
                    let _ = tx.send(Message::Pong(payload));
                }
                Message::Pong(_) => {
                    state.registry.touch(&client_id);
                }
                Message::Close(frame) => {
                    tracing::debug!(client_id = %client_id, frame = ?frame, "peer closed");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::debug!(client_id = %client_id, error = %e, "receive error");
                break;
            }
            None => {
                break;
            }
        }
    }

    writer_handle.abort();
    disconnect(&state, &client_id);
}

/// Terminal transition: cancel timers, drop room membership and session
/// key, unindex the user id, remove the record exactly once, and notify the
/// host. Safe to call from any path; only the first caller finds the record.
pub(crate) fn disconnect(state: &HubState, client_id: &str) {
    let Some(client) = state.registry.remove(client_id) else {
        return;
    };

    state.rooms.leave_all(client_id);
    state.gateway.remove_key(client_id);

    tracing::info!(
        client_id = %client_id,
        user_id = ?client.user_id,
        "client disconnected"
    );

    if let Some(on_disconnected) = &state.hooks.on_disconnected {
        on_disconnected((&client).into());
    }
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken.
            break;
        }
    }
}
