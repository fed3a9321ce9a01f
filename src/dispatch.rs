//! Local dispatcher: delivery to a connection id, a user id, a room, or all
//! authenticated clients on this instance.
//!
//! Room and broadcast delivery pick one of two strategies. Without an
//! outbound transform configured, a frame is serialized once and pushed to
//! every eligible sender (the native multicast path). With a transform
//! configured, every member is delivered individually under a bounded
//! concurrency limit, because the transform output is per-recipient.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::state::HubState;
use crate::ws::Frame;

/// Deliver one event to one connection id. Absent ids are a no-op. For
/// encrypted clients the frame is routed through the outbound transform
/// first; a declined transform sends the original, a failed transform skips
/// this one delivery.
pub async fn send_to_client(state: &HubState, client_id: &str, event: &str, data: Value) {
    let Some(info) = state.registry.snapshot(client_id) else {
        return;
    };

    let frame = Frame::new(event, data);
    let out = if info.encrypted {
        match &state.hooks.transform {
            Some(transform) => match transform(info, frame.clone()).await {
                Ok(Some(rewritten)) => rewritten,
                Ok(None) => frame,
                Err(e) => {
                    tracing::warn!(
                        client_id = %client_id,
                        error = %e,
                        "outbound transform failed; delivery skipped"
                    );
                    return;
                }
            },
            None => frame,
        }
    } else {
        frame
    };

    // The transform may have suspended; the client can be gone by now.
    if let Some(sender) = state.registry.deliverable_sender(client_id) {
        let _ = sender.send(out.to_message());
    }
}

/// Deliver to every session of a user (a user may be connected from several
/// devices at once).
pub async fn send_to_user(state: &HubState, user_id: &str, event: &str, data: Value) {
    for client_id in state.registry.clients_of_user(user_id) {
        send_to_client(state, &client_id, event, data.clone()).await;
    }
}

/// Deliver to every member of a room, optionally excluding one connection.
pub async fn send_to_room(
    state: &HubState,
    room: &str,
    event: &str,
    data: Value,
    exclude: Option<&str>,
) {
    if state.transform_configured() {
        let members = state.rooms.members_of(room);
        deliver_individually(state, members, event, data, exclude).await;
    } else {
        let frame = Frame::new(event, data);
        let message = frame.to_message();
        for client_id in state.rooms.multicast_of(room) {
            if Some(client_id.as_str()) == exclude {
                continue;
            }
            if let Some(sender) = state.registry.deliverable_sender(&client_id) {
                let _ = sender.send(message.clone());
            }
        }
    }
}

/// Deliver to every authenticated client on this instance.
pub async fn broadcast(state: &HubState, event: &str, data: Value, exclude: Option<&str>) {
    if state.transform_configured() {
        let targets = state.registry.authenticated_ids(exclude);
        deliver_individually(state, targets, event, data, None).await;
    } else {
        let frame = Frame::new(event, data);
        let message = frame.to_message();
        for sender in state.registry.multicast_senders(exclude) {
            let _ = sender.send(message.clone());
        }
    }
}

/// Per-client delivery under a sliding-window limiter. Bounds simultaneous
/// transform (cryptographic) work when a room has many members. Partial
/// failure is tolerated: a member whose delivery fails is skipped, its
/// siblings still receive the message.
async fn deliver_individually(
    state: &HubState,
    targets: Vec<String>,
    event: &str,
    data: Value,
    exclude: Option<&str>,
) {
    let limiter = Arc::new(Semaphore::new(state.settings.fanout_concurrency.max(1)));
    let mut deliveries = Vec::with_capacity(targets.len());

    for client_id in targets {
        if Some(client_id.as_str()) == exclude {
            continue;
        }
        let Ok(permit) = limiter.clone().acquire_owned().await else {
            break;
        };

        let state = state.clone();
        let event = event.to_string();
        let data = data.clone();
        deliveries.push(tokio::spawn(async move {
            send_to_client(&state, &client_id, &event, data).await;
            drop(permit);
        }));
    }

    for delivery in deliveries {
        let _ = delivery.await;
    }
}
