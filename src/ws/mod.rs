pub mod actor;
pub mod handler;
pub mod protocol;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// WebSocket close codes (wire contract, stable across deployments):
/// 4001 = authentication timeout
/// 4002 = heartbeat timeout
/// 4003 = authentication rejected
/// 4004 = encryption required but handshake missing/failed
/// 1001 = graceful server shutdown
pub const CLOSE_AUTH_TIMEOUT: u16 = 4001;
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4002;
pub const CLOSE_AUTH_REJECTED: u16 = 4003;
pub const CLOSE_ENCRYPTION_REQUIRED: u16 = 4004;
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One wire message: a named event plus an arbitrary JSON payload.
/// Sent as a WebSocket text frame in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serialize into a WebSocket text message.
    pub fn to_message(&self) -> axum::extract::ws::Message {
        // Frame is two plain fields; serialization cannot fail.
        let text = serde_json::to_string(self).unwrap_or_default();
        axum::extract::ws::Message::Text(text.into())
    }
}

/// Build a Close message carrying one of the taxonomy codes.
pub fn close_message(code: u16, reason: &str) -> axum::extract::ws::Message {
    axum::extract::ws::Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
