//! Injected host callbacks.
//!
//! Every integration point with the surrounding application is a named
//! function-typed field on [`Hooks`] — no plugin registry, no lookup by
//! string. Each hook is awaited at exactly one call site, and hook errors
//! are caught there, logged, and degraded to a rejection/no-op for that one
//! operation; they never cross into protocol state.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::client::ClientInfo;
use crate::ws::Frame;

/// Error type hooks may surface. Treated as rejection at the call site.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Identity returned by a successful authenticate hook.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user_id: String,
    /// Application-defined payload (role, permissions...), opaque here.
    pub metadata: Option<Value>,
}

/// Result of a successful key-exchange handshake.
pub struct HandshakeOutcome {
    /// Server exchange material sent back to the client.
    pub reply: Value,
    /// Derived per-client session key, owned by the encryption gateway
    /// until disconnect. Never persisted.
    pub session_key: [u8; 32],
}

/// `authenticate` payload -> identity. `Ok(None)` rejects the attempt.
pub type AuthenticateFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Option<AuthOutcome>, HookError>> + Send + Sync>;

/// `(client_id, requested_rooms)` -> allowed subset. Absent hook means
/// every client-initiated join is denied (fail-closed).
pub type ValidateRoomsFn = Arc<
    dyn Fn(String, Vec<String>) -> BoxFuture<'static, Result<Vec<String>, HookError>>
        + Send
        + Sync,
>;

/// `(client_id, user_id, payload)` -> handshake result. `Ok(None)` rejects.
pub type HandshakeFn = Arc<
    dyn Fn(
            String,
            Option<String>,
            Value,
        ) -> BoxFuture<'static, Result<Option<HandshakeOutcome>, HookError>>
        + Send
        + Sync,
>;

/// Outbound rewrite for encrypted clients, run immediately before every
/// write. `Ok(None)` means "send unmodified" (system frames that must stay
/// inspectable). `Err` skips that one delivery.
pub type TransformFn = Arc<
    dyn Fn(ClientInfo, Frame) -> BoxFuture<'static, Result<Option<Frame>, HookError>>
        + Send
        + Sync,
>;

/// Fire-and-forget lifecycle notification.
pub type LifecycleFn = Arc<dyn Fn(ClientInfo) + Send + Sync>;

/// The full callback set. All fields optional; absent authenticate or
/// room-validation hooks fail closed.
#[derive(Clone, Default)]
pub struct Hooks {
    pub authenticate: Option<AuthenticateFn>,
    pub validate_rooms: Option<ValidateRoomsFn>,
    pub handshake: Option<HandshakeFn>,
    pub transform: Option<TransformFn>,
    pub on_connected: Option<LifecycleFn>,
    pub on_disconnected: Option<LifecycleFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("authenticate", &self.authenticate.is_some())
            .field("validate_rooms", &self.validate_rooms.is_some())
            .field("handshake", &self.handshake.is_some())
            .field("transform", &self.transform.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .finish()
    }
}
