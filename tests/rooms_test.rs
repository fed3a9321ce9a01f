//! Integration tests for room membership: fail-closed joins, validation,
//! idempotent leave, and opportunistic pruning.

use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hivewire::hooks::{AuthOutcome, Hooks};
use hivewire::routes;
use hivewire::state::{HubState, Settings};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn token_hooks() -> Hooks {
    let mut hooks = Hooks::new();
    hooks.authenticate = Some(Arc::new(|payload| {
        async move {
            if payload.get("token").and_then(Value::as_str) == Some("valid") {
                Ok(Some(AuthOutcome {
                    user_id: "u1".to_string(),
                    metadata: None,
                }))
            } else {
                Ok(None)
            }
        }
        .boxed()
    }));
    hooks
}

/// Room validator allowing exactly the given names.
fn allow_rooms(hooks: &mut Hooks, allowed: &[&str]) {
    let allowed: Vec<String> = allowed.iter().map(|r| r.to_string()).collect();
    hooks.validate_rooms = Some(Arc::new(move |_client_id, requested| {
        let allowed = allowed.clone();
        async move {
            Ok(requested
                .into_iter()
                .filter(|room| allowed.contains(room))
                .collect())
        }
        .boxed()
    }));
}

async fn start_server(state: HubState) -> SocketAddr {
    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn send_frame(ws: &mut WsStream, event: &str, data: Value) {
    ws.send(Message::Text(
        json!({ "event": event, "data": data }).to_string().into(),
    ))
    .await
    .expect("send failed");
}

async fn next_frame(ws: &mut WsStream, window: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(window, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return serde_json::from_str(text.as_str()).ok();
            }
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Connect and authenticate; returns the socket and the connection id.
async fn authed_client(addr: SocketAddr) -> (WsStream, String) {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("WebSocket connect failed");
    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;
    let frame = next_frame(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected connected frame");
    let id = frame["data"]["id"].as_str().unwrap().to_string();
    (ws, id)
}

/// Joins are fire-and-forget; give the server a beat to process them.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn joins_are_denied_without_a_validator() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state.clone()).await;

    let (mut ws, client_id) = authed_client(addr).await;
    send_frame(&mut ws, "join", json!({ "rooms": ["chat", "general"] })).await;
    settle().await;

    assert!(!state.rooms.is_member("chat", &client_id));
    // No error frame either: rejected joins are silent.
    assert!(next_frame(&mut ws, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn validator_admits_only_the_allowed_subset() {
    let mut hooks = token_hooks();
    allow_rooms(&mut hooks, &["chat"]);
    let state = HubState::new(Settings::default(), hooks);
    let addr = start_server(state.clone()).await;

    let (mut ws, client_id) = authed_client(addr).await;
    send_frame(&mut ws, "join", json!({ "rooms": ["chat", "secret-ops"] })).await;
    settle().await;

    assert!(state.rooms.is_member("chat", &client_id));
    assert!(!state.rooms.is_member("secret-ops", &client_id));
}

#[tokio::test]
async fn invalid_room_names_never_create_membership() {
    let mut hooks = token_hooks();
    // Permissive validator: name validation must still reject these.
    hooks.validate_rooms = Some(Arc::new(|_id, requested| {
        async move { Ok(requested) }.boxed()
    }));
    let state = HubState::new(Settings::default(), hooks);
    let addr = start_server(state.clone()).await;

    let (mut ws, client_id) = authed_client(addr).await;
    let oversized = "x".repeat(300);
    send_frame(
        &mut ws,
        "join",
        json!({ "rooms": ["#hw.fanout", "", oversized] }),
    )
    .await;
    settle().await;

    assert!(!state.rooms.is_member("#hw.fanout", &client_id));
    assert_eq!(state.rooms.members_of("#hw.fanout"), Vec::<String>::new());
}

#[tokio::test]
async fn leave_is_idempotent_and_silent() {
    let mut hooks = token_hooks();
    allow_rooms(&mut hooks, &["chat"]);
    let state = HubState::new(Settings::default(), hooks);
    let addr = start_server(state.clone()).await;

    let (mut ws, client_id) = authed_client(addr).await;
    send_frame(&mut ws, "join", json!({ "room": "chat" })).await;
    settle().await;
    assert!(state.rooms.is_member("chat", &client_id));

    send_frame(&mut ws, "leave", json!({ "room": "chat" })).await;
    send_frame(&mut ws, "leave", json!({ "room": "chat" })).await;
    send_frame(&mut ws, "leave", json!({ "room": "never-joined" })).await;
    settle().await;

    assert!(!state.rooms.is_member("chat", &client_id));

    // Connection is still healthy after the no-op leaves.
    send_frame(&mut ws, "heartbeat", json!({})).await;
    assert!(state.registry.contains(&client_id));
}

#[tokio::test]
async fn malformed_join_payloads_are_ignored() {
    let mut hooks = token_hooks();
    allow_rooms(&mut hooks, &["chat"]);
    let state = HubState::new(Settings::default(), hooks);
    let addr = start_server(state.clone()).await;

    let (mut ws, client_id) = authed_client(addr).await;
    send_frame(&mut ws, "join", json!({ "rooms": "not-an-array" })).await;
    send_frame(&mut ws, "join", json!(42)).await;
    settle().await;

    assert!(!state.rooms.is_member("chat", &client_id));
    assert!(state.registry.contains(&client_id));
}

#[tokio::test]
async fn disconnect_prunes_membership_and_empty_rooms() {
    let mut hooks = token_hooks();
    allow_rooms(&mut hooks, &["chat"]);
    let state = HubState::new(Settings::default(), hooks);
    let addr = start_server(state.clone()).await;

    let (mut ws, client_id) = authed_client(addr).await;
    send_frame(&mut ws, "join", json!({ "room": "chat" })).await;
    settle().await;
    assert!(state.rooms.is_member("chat", &client_id));

    ws.close(None).await.unwrap();

    for _ in 0..50 {
        if !state.registry.contains(&client_id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!state.registry.contains(&client_id));
    assert!(state.rooms.members_of("chat").is_empty());
    assert!(state.rooms.members_of(&client_id).is_empty());
}
