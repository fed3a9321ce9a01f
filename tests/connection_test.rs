//! Integration tests for the connection lifecycle: post-connect
//! authentication, the auth window, close codes, and lifecycle hooks.

use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hivewire::dispatch;
use hivewire::hooks::{AuthOutcome, Hooks};
use hivewire::routes;
use hivewire::state::{HubState, Settings};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Authenticate hook accepting token "valid"; user id rides in the payload.
fn token_hooks() -> Hooks {
    let mut hooks = Hooks::new();
    hooks.authenticate = Some(Arc::new(|payload| {
        async move {
            if payload.get("token").and_then(Value::as_str) != Some("valid") {
                return Ok(None);
            }
            let user_id = payload
                .get("user_id")
                .and_then(Value::as_str)
                .unwrap_or("u1")
                .to_string();
            Ok(Some(AuthOutcome {
                user_id,
                metadata: None,
            }))
        }
        .boxed()
    }));
    hooks
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

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("WebSocket connect failed");
    ws
}

async fn send_frame(ws: &mut WsStream, event: &str, data: Value) {
    ws.send(Message::Text(
        json!({ "event": event, "data": data }).to_string().into(),
    ))
    .await
    .expect("send failed");
}

/// Next text frame as parsed JSON, or None on timeout.
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

/// Read until the server closes the connection; returns the close code.
async fn next_close(ws: &mut WsStream, window: Duration) -> Option<u16> {
    loop {
        match tokio::time::timeout(window, ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                return frame.map(|f| u16::from(f.code));
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn authenticate_success_sends_connected_and_joins_default_rooms() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state.clone()).await;

    let mut ws = connect(addr).await;
    send_frame(
        &mut ws,
        "authenticate",
        json!({ "token": "valid", "user_id": "u1" }),
    )
    .await;

    let frame = next_frame(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected connected frame");
    assert_eq!(frame["event"], "connected");
    assert_eq!(frame["data"]["user_id"], "u1");
    assert_eq!(frame["data"]["encrypted"], false);

    let client_id = frame["data"]["id"].as_str().unwrap().to_string();
    assert!(!client_id.is_empty());

    // Default rooms plus the private id-room.
    assert!(state.rooms.is_member("general", &client_id));
    assert!(state.rooms.is_member("notifications", &client_id));
    assert!(state.rooms.is_member(&client_id, &client_id));
}

#[tokio::test]
async fn silent_client_is_closed_with_4001_inside_the_window() {
    let settings = Settings {
        auth_timeout: Duration::from_millis(300),
        ..Settings::default()
    };
    let state = HubState::new(settings, token_hooks());
    let addr = start_server(state).await;

    let started = Instant::now();
    let mut ws = connect(addr).await;

    let code = next_close(&mut ws, Duration::from_secs(3)).await;
    let elapsed = started.elapsed();

    assert_eq!(code, Some(4001));
    assert!(elapsed >= Duration::from_millis(250), "closed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "closed too late: {elapsed:?}");
}

#[tokio::test]
async fn rejected_authentication_surfaces_then_closes_with_4003() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state).await;

    let mut ws = connect(addr).await;
    send_frame(&mut ws, "authenticate", json!({ "token": "wrong" })).await;

    let frame = next_frame(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected unauthenticated frame");
    assert_eq!(frame["event"], "unauthenticated");

    let code = next_close(&mut ws, Duration::from_secs(2)).await;
    assert_eq!(code, Some(4003));
}

#[tokio::test]
async fn missing_authenticate_hook_fails_closed() {
    let state = HubState::new(Settings::default(), Hooks::new());
    let addr = start_server(state).await;

    let mut ws = connect(addr).await;
    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;

    let frame = next_frame(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected unauthenticated frame");
    assert_eq!(frame["event"], "unauthenticated");
    assert_eq!(
        next_close(&mut ws, Duration::from_secs(2)).await,
        Some(4003)
    );
}

#[tokio::test]
async fn pre_auth_application_frames_are_silently_ignored() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state).await;

    let mut ws = connect(addr).await;
    send_frame(&mut ws, "message", json!({ "body": "too early" })).await;
    send_frame(&mut ws, "join", json!({ "rooms": ["general"] })).await;

    // No response of any kind to the violations...
    assert!(next_frame(&mut ws, Duration::from_millis(300)).await.is_none());

    // ...and the state machine still moves forward normally afterwards.
    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;
    let frame = next_frame(&mut ws, Duration::from_secs(2))
        .await
        .expect("expected connected frame");
    assert_eq!(frame["event"], "connected");
}

#[tokio::test]
async fn repeated_authenticate_after_success_is_ignored() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state).await;

    let mut ws = connect(addr).await;
    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;
    let frame = next_frame(&mut ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(frame["event"], "connected");

    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;
    assert!(next_frame(&mut ws, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn lifecycle_hooks_fire_and_disconnect_cleans_the_registry() {
    let connected = Arc::new(AtomicUsize::new(0));
    let disconnected = Arc::new(AtomicUsize::new(0));

    let mut hooks = token_hooks();
    let c = connected.clone();
    hooks.on_connected = Some(Arc::new(move |_info| {
        c.fetch_add(1, Ordering::SeqCst);
    }));
    let d = disconnected.clone();
    hooks.on_disconnected = Some(Arc::new(move |_info| {
        d.fetch_add(1, Ordering::SeqCst);
    }));

    let state = HubState::new(Settings::default(), hooks);
    let addr = start_server(state.clone()).await;

    let mut ws = connect(addr).await;
    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;
    let frame = next_frame(&mut ws, Duration::from_secs(2)).await.unwrap();
    let client_id = frame["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(connected.load(Ordering::SeqCst), 1);

    ws.close(None).await.unwrap();

    // Disconnect runs in the actor after the reader loop ends.
    for _ in 0..50 {
        if disconnected.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert!(!state.registry.contains(&client_id));
    assert!(state.registry.is_empty());
    assert!(state.rooms.members_of("general").is_empty());
}

#[tokio::test]
async fn user_delivery_reaches_every_session_of_that_user() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state.clone()).await;

    // Same user id from two devices.
    let mut first = connect(addr).await;
    send_frame(
        &mut first,
        "authenticate",
        json!({ "token": "valid", "user_id": "u7" }),
    )
    .await;
    next_frame(&mut first, Duration::from_secs(2)).await.unwrap();

    let mut second = connect(addr).await;
    send_frame(
        &mut second,
        "authenticate",
        json!({ "token": "valid", "user_id": "u7" }),
    )
    .await;
    next_frame(&mut second, Duration::from_secs(2)).await.unwrap();

    dispatch::send_to_user(&state, "u7", "ping", json!({ "n": 1 })).await;

    for ws in [&mut first, &mut second] {
        let frame = next_frame(ws, Duration::from_secs(2))
            .await
            .expect("every session of the user receives the event");
        assert_eq!(frame["event"], "ping");
    }
}

#[tokio::test]
async fn shutdown_closes_every_connection_with_1001() {
    let state = HubState::new(Settings::default(), token_hooks());
    let addr = start_server(state.clone()).await;

    let mut ws = connect(addr).await;
    send_frame(&mut ws, "authenticate", json!({ "token": "valid" })).await;
    next_frame(&mut ws, Duration::from_secs(2)).await.unwrap();

    state.shutdown();

    assert_eq!(
        next_close(&mut ws, Duration::from_secs(2)).await,
        Some(1001)
    );
}
