//! Inbound event dispatch and the per-client authentication state machine.
//!
//! Malformed frames and disallowed operations are silently ignored
//! (protocol-violation taxonomy): the server never reveals internal
//! topology through accept/reject behavior. Authentication failures are
//! the exception — they are surfaced explicitly before the close.

use serde_json::{json, Value};

use crate::client::ClientState;
use crate::state::HubState;
use crate::ws::{
    close_message, ConnectionSender, Frame, CLOSE_AUTH_REJECTED, CLOSE_ENCRYPTION_REQUIRED,
};

/// Handle one inbound text frame. Activity was already recorded by the
/// actor before this is called.
pub async fn handle_frame(state: &HubState, client_id: &str, tx: &ConnectionSender, raw: &str) {
    let frame: Frame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(client_id = %client_id, error = %e, "malformed frame ignored");
            return;
        }
    };

    match frame.event.as_str() {
        "authenticate" => handle_authenticate(state, client_id, tx, frame.data).await,
        "join" => handle_join(state, client_id, frame.data).await,
        "leave" => handle_leave(state, client_id, frame.data),
        "heartbeat" => {
            tracing::trace!(client_id = %client_id, "heartbeat");
        }
        "encrypt" => handle_encrypt(state, client_id, tx, frame.data).await,
        other => {
            if state.registry.state_of(client_id) == Some(ClientState::Authenticated) {
                tracing::debug!(
                    client_id = %client_id,
                    event = %other,
                    "unhandled application event"
                );
            } else {
                tracing::debug!(client_id = %client_id, event = %other, "pre-auth frame ignored");
            }
        }
    }
}

/// `authenticate`: honored only in `Unauthorized`. Runs the host's hook,
/// re-checks the registry after the await (the client may have disconnected
/// mid-check), then either completes the lifecycle transition or reverts
/// and closes with 4003.
async fn handle_authenticate(
    state: &HubState,
    client_id: &str,
    tx: &ConnectionSender,
    data: Value,
) {
    if !state.registry.begin_authentication(client_id) {
        tracing::debug!(client_id = %client_id, "authenticate ignored in current state");
        return;
    }

    let Some(authenticate) = state.hooks.authenticate.clone() else {
        tracing::warn!("no authenticate hook configured; rejecting");
        reject(state, client_id, tx);
        return;
    };

    let outcome = authenticate(data.clone()).await;

    // Disconnect during an in-flight authentication is an expected race:
    // discard the result rather than mutating a vanished record.
    if !state.registry.contains(client_id) {
        tracing::debug!(client_id = %client_id, "client disconnected during authentication");
        return;
    }

    let identity = match outcome {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            reject(state, client_id, tx);
            return;
        }
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "authenticate hook failed");
            reject(state, client_id, tx);
            return;
        }
    };

    if !state
        .registry
        .complete_authentication(client_id, identity.user_id.clone(), identity.metadata)
    {
        return;
    }

    // Default rooms bypass the room-validation hook; server-side joins are
    // trusted.
    for room in &state.settings.default_rooms {
        state.rooms.join(client_id, room, true);
    }

    let mut handshake_reply = Value::Null;
    if state.settings.require_encryption {
        match run_handshake(state, client_id, Some(&identity.user_id), &data).await {
            Some(reply) => handshake_reply = reply,
            None => {
                let _ = tx.send(close_message(
                    CLOSE_ENCRYPTION_REQUIRED,
                    "Encryption required",
                ));
                return;
            }
        }
    }

    let encrypted = state.registry.is_encrypted(client_id);
    let connected = Frame::new(
        "connected",
        json!({
            "id": client_id,
            "user_id": identity.user_id,
            "encrypted": encrypted,
            "handshake": handshake_reply,
        }),
    );
    let _ = tx.send(connected.to_message());

    tracing::info!(
        client_id = %client_id,
        user_id = %identity.user_id,
        encrypted = encrypted,
        "client authenticated"
    );

    if let Some(on_connected) = &state.hooks.on_connected {
        if let Some(info) = state.registry.snapshot(client_id) {
            on_connected(info);
        }
    }
}

/// Reject path: revert to `Unauthorized`, surface the failure, close 4003.
/// The auth timer from connect time keeps running — a failed attempt does
/// not grant extra time.
fn reject(state: &HubState, client_id: &str, tx: &ConnectionSender) {
    state.registry.revert_authentication(client_id);
    let _ = tx.send(
        Frame::new(
            "unauthenticated",
            json!({ "message": "Authentication rejected" }),
        )
        .to_message(),
    );
    let _ = tx.send(close_message(CLOSE_AUTH_REJECTED, "Authentication rejected"));
}

/// `join`: fail-closed and silent. No room-validation hook means every
/// client-initiated join is denied; a rejected join produces no membership
/// change and no client-visible error frame.
async fn handle_join(state: &HubState, client_id: &str, data: Value) {
    if state.registry.state_of(client_id) != Some(ClientState::Authenticated) {
        return;
    }

    let requested = parse_rooms(&data);
    if requested.is_empty() {
        return;
    }

    let Some(validate) = state.hooks.validate_rooms.clone() else {
        tracing::debug!(client_id = %client_id, "no room validator configured; join denied");
        return;
    };

    let allowed = match validate(client_id.to_string(), requested.clone()).await {
        Ok(allowed) => allowed,
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "room validation hook failed");
            return;
        }
    };

    if !state.registry.contains(client_id) {
        return;
    }

    let multicast_eligible = !state.registry.is_encrypted(client_id);
    for room in allowed {
        if requested.contains(&room) {
            state.rooms.join(client_id, &room, multicast_eligible);
        }
    }
}

/// `leave`: idempotent. A client cannot leave its own id-room, which must
/// exist for direct addressing until disconnect.
fn handle_leave(state: &HubState, client_id: &str, data: Value) {
    if state.registry.state_of(client_id) != Some(ClientState::Authenticated) {
        return;
    }

    for room in parse_rooms(&data) {
        if room == client_id {
            continue;
        }
        state.rooms.leave(client_id, &room);
    }
}

/// `encrypt`: manual-mode handshake after connection, same side effects as
/// the enforced variant. Failure is an error frame, not a close — the
/// deployment did not require encryption.
async fn handle_encrypt(state: &HubState, client_id: &str, tx: &ConnectionSender, data: Value) {
    if state.registry.state_of(client_id) != Some(ClientState::Authenticated) {
        return;
    }
    if state.registry.is_encrypted(client_id) {
        tracing::debug!(client_id = %client_id, "encrypt ignored: already encrypted");
        return;
    }

    let user_id = state
        .registry
        .snapshot(client_id)
        .and_then(|info| info.user_id);

    match run_handshake(state, client_id, user_id.as_deref(), &data).await {
        Some(reply) => {
            let _ = tx.send(Frame::new("encrypt", json!({ "handshake": reply })).to_message());
        }
        None => {
            let _ = tx
                .send(Frame::new("error", json!({ "message": "Handshake failed" })).to_message());
        }
    }
}

/// Run the handshake hook and, on success, install the session key, mark
/// the client encrypted, and flip it out of every native multicast group
/// (including its own id-room) so it only receives individually through
/// the transform.
async fn run_handshake(
    state: &HubState,
    client_id: &str,
    user_id: Option<&str>,
    payload: &Value,
) -> Option<Value> {
    let handshake = state.hooks.handshake.clone()?;

    let outcome = match handshake(
        client_id.to_string(),
        user_id.map(String::from),
        payload.clone(),
    )
    .await
    {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            tracing::debug!(client_id = %client_id, "handshake rejected: no exchange material");
            return None;
        }
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "handshake hook failed");
            return None;
        }
    };

    if !state.registry.contains(client_id) {
        return None;
    }

    state.gateway.install_key(client_id, outcome.session_key);
    state.registry.mark_encrypted(client_id);
    state.rooms.remove_from_multicast(client_id);

    tracing::info!(client_id = %client_id, "client flipped to encrypted delivery");
    Some(outcome.reply)
}

/// Accept `{"rooms": ["a", "b"]}` or `{"room": "a"}`. Anything else is a
/// malformed payload and yields no rooms.
fn parse_rooms(data: &Value) -> Vec<String> {
    if let Some(rooms) = data.get("rooms").and_then(Value::as_array) {
        return rooms
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
    }
    if let Some(room) = data.get("room").and_then(Value::as_str) {
        return vec![room.to_string()];
    }
    Vec::new()
}
