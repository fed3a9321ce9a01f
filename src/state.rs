//! Shared hub state passed to every connection actor and background task.

use std::sync::Arc;
use std::time::Duration;

use crate::fanout::Broker;
use crate::gateway::EncryptionGateway;
use crate::hooks::Hooks;
use crate::registry::ClientRegistry;
use crate::rooms::RoomIndex;
use crate::ws::CLOSE_GOING_AWAY;

/// Runtime knobs, resolved once at construction.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Window for a successful `authenticate` after connect.
    pub auth_timeout: Duration,
    /// Inactivity window before an authenticated client is closed with 4002.
    pub heartbeat_timeout: Duration,
    /// Sweep cadence of the heartbeat monitor.
    pub heartbeat_interval: Duration,
    /// Rooms every client is auto-joined to right after authentication.
    pub default_rooms: Vec<String>,
    /// Fold the key-exchange handshake into authentication and require it.
    pub require_encryption: bool,
    /// Maximum in-flight deliveries on the per-client transform path.
    pub fanout_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            default_rooms: vec!["general".to_string(), "notifications".to_string()],
            require_encryption: false,
            fanout_concurrency: 10,
        }
    }
}

impl Settings {
    /// Default for the handshake-bundled variant: key exchange inside the
    /// authenticate round-trip warrants a wider window.
    pub fn encrypted() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            require_encryption: true,
            ..Self::default()
        }
    }
}

/// Shared hub state. Cloneable — every field is a shared handle.
#[derive(Clone)]
pub struct HubState {
    /// Instance-wide random id used for fanout loop prevention.
    /// Immutable, set once at construction.
    pub instance_id: String,
    pub settings: Arc<Settings>,
    pub registry: ClientRegistry,
    pub rooms: RoomIndex,
    pub gateway: EncryptionGateway,
    pub hooks: Arc<Hooks>,
    /// Cross-instance pub/sub; absent for standalone deployments.
    pub broker: Option<Arc<dyn Broker>>,
}

impl HubState {
    pub fn new(settings: Settings, hooks: Hooks) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            settings: Arc::new(settings),
            registry: ClientRegistry::new(),
            rooms: RoomIndex::new(),
            gateway: EncryptionGateway::new(),
            hooks: Arc::new(hooks),
            broker: None,
        }
    }

    /// Attach a broker for cross-instance delivery. The caller spawns the
    /// subscriber side with [`crate::fanout::spawn_subscriber`].
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Share a pre-built gateway, so the outbound transform hook and the
    /// hub operate on the same session-key store.
    pub fn with_gateway(mut self, gateway: EncryptionGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Whether the per-client transform delivery path is in effect for this
    /// deployment (a transform hook is configured at all).
    pub fn transform_configured(&self) -> bool {
        self.hooks.transform.is_some()
    }

    /// Graceful shutdown: push Close(1001) to every live connection.
    pub fn shutdown(&self) {
        tracing::info!(
            clients = self.registry.len(),
            "closing all connections for shutdown"
        );
        self.registry.close_all(CLOSE_GOING_AWAY, "Server shutting down");
    }
}

impl std::fmt::Debug for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubState")
            .field("instance_id", &self.instance_id)
            .field("settings", &self.settings)
            .field("clients", &self.registry.len())
            .field("rooms", &self.rooms.room_count())
            .field("broker", &self.broker.is_some())
            .finish()
    }
}
