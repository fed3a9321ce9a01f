//! Per-connection client record and its lifecycle states.

use std::time::Instant;

use tokio::task::JoinHandle;

use crate::ws::ConnectionSender;

/// Lifecycle of one connection. Forward-only, except that a rejected
/// authentication attempt reverts `Authenticating -> Unauthorized` so the
/// client may retry before its auth window expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, no identity yet. Only `authenticate` is honored.
    Unauthorized,
    /// An authenticate attempt is in flight against the host's hook.
    Authenticating,
    /// Identity established; eligible for delivery and heartbeat monitoring.
    Authenticated,
    /// Terminal. Set on the record as it leaves the registry.
    Disconnected,
}

/// One live connection. Exists in the registry from connect to disconnect
/// and is removed exactly once.
#[derive(Debug)]
pub struct Client {
    /// Connection id (UUIDv4), stable for the connection's lifetime.
    /// Doubles as the client's private singleton room name.
    pub id: String,
    /// Channel into the connection's writer task. Dropping the last clone
    /// closes the socket exactly once.
    pub sender: ConnectionSender,
    pub state: ClientState,
    /// Set only after successful authentication. Many clients may share one
    /// user id (multiple devices/tabs).
    pub user_id: Option<String>,
    /// Opaque payload returned by the authenticate hook (role, permissions...).
    pub metadata: Option<serde_json::Value>,
    /// True once the encryption gateway completed a handshake for this client.
    pub encrypted: bool,
    /// Updated on every inbound message; read by the heartbeat monitor.
    pub last_activity: Instant,
    /// Force-closes the connection if no successful authentication happens
    /// within the window. Aborted on success or disconnect, never reset.
    pub auth_timer: Option<JoinHandle<()>>,
}

impl Client {
    pub fn new(id: String, sender: ConnectionSender, auth_timer: JoinHandle<()>) -> Self {
        Self {
            id,
            sender,
            state: ClientState::Unauthorized,
            user_id: None,
            metadata: None,
            encrypted: false,
            last_activity: Instant::now(),
            auth_timer: Some(auth_timer),
        }
    }
}

/// Immutable snapshot of a client handed to hooks and the outbound transform.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: String,
    pub state: ClientState,
    pub user_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub encrypted: bool,
}

impl From<&Client> for ClientInfo {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id.clone(),
            state: client.state,
            user_id: client.user_id.clone(),
            metadata: client.metadata.clone(),
            encrypted: client.encrypted,
        }
    }
}
