use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::Settings;

/// hivewire realtime server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "hivewire", version, about = "hivewire realtime messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HIVEWIRE_PORT", default_value = "4200")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HIVEWIRE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./hivewire.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HIVEWIRE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Shared token the reference authenticate hook checks. Auto-generated
    /// and logged on boot when unset.
    #[arg(long, env = "HIVEWIRE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Authentication window in milliseconds. Unset resolves to 5000, or
    /// 10000 when encryption is required (handshake-bundled variant).
    #[arg(long, env = "HIVEWIRE_AUTH_TIMEOUT_MS")]
    pub auth_timeout_ms: Option<u64>,

    /// Liveness window in milliseconds before an idle client is closed (4002)
    #[arg(long, env = "HIVEWIRE_HEARTBEAT_TIMEOUT_MS", default_value = "30000")]
    pub heartbeat_timeout_ms: u64,

    /// Heartbeat sweep cadence in milliseconds
    #[arg(long, env = "HIVEWIRE_HEARTBEAT_INTERVAL_MS", default_value = "10000")]
    pub heartbeat_interval_ms: u64,

    /// Require the key-exchange handshake inside the authenticate round-trip
    #[arg(long, env = "HIVEWIRE_REQUIRE_ENCRYPTION")]
    pub require_encryption: bool,

    /// Maximum in-flight deliveries on the per-client transform path
    #[arg(long, env = "HIVEWIRE_FANOUT_CONCURRENCY", default_value = "10")]
    pub fanout_concurrency: usize,

    /// Rooms every client is auto-joined to after authentication
    /// (loaded from the TOML file)
    #[arg(skip)]
    #[serde(default = "default_rooms")]
    pub default_rooms: Vec<String>,

    /// Rooms clients may join on request. Empty list denies every
    /// client-initiated join (fail-closed). (loaded from the TOML file)
    #[arg(skip)]
    #[serde(default)]
    pub allowed_rooms: Vec<String>,
}

fn default_rooms() -> Vec<String> {
    vec!["general".to_string(), "notifications".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4200,
            bind_address: "0.0.0.0".to_string(),
            config: "./hivewire.toml".to_string(),
            json_logs: false,
            generate_config: false,
            auth_token: None,
            auth_timeout_ms: None,
            heartbeat_timeout_ms: 30_000,
            heartbeat_interval_ms: 10_000,
            require_encryption: false,
            fanout_concurrency: 10,
            default_rooms: default_rooms(),
            allowed_rooms: Vec::new(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HIVEWIRE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HIVEWIRE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Resolve runtime settings from this config.
    pub fn settings(&self) -> Settings {
        let auth_timeout_ms = self.auth_timeout_ms.unwrap_or(if self.require_encryption {
            10_000
        } else {
            5_000
        });

        Settings {
            auth_timeout: Duration::from_millis(auth_timeout_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            default_rooms: self.default_rooms.clone(),
            require_encryption: self.require_encryption,
            fanout_concurrency: self.fanout_concurrency,
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# hivewire realtime server configuration
# Place this file at ./hivewire.toml or specify with --config <path>
# All settings can be overridden via environment variables (HIVEWIRE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4200)
# port = 4200

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Shared token checked by the reference authenticate hook.
# Auto-generated and logged on boot when unset.
# auth_token = ""

# Authentication window in milliseconds.
# Unset: 5000, or 10000 when require_encryption is on.
# auth_timeout_ms = 5000

# Liveness window before an idle client is closed with code 4002
# heartbeat_timeout_ms = 30000

# Heartbeat sweep cadence
# heartbeat_interval_ms = 10000

# Require the key-exchange handshake inside the authenticate round-trip.
# Clients without exchange material are closed with code 4004.
# require_encryption = false

# Maximum in-flight deliveries on the per-client (encrypted) delivery path
# fanout_concurrency = 10

# Rooms every client is auto-joined to after authentication
# default_rooms = ["general", "notifications"]

# Rooms clients may join on request. An empty list denies every
# client-initiated join (fail-closed).
# allowed_rooms = []
"#
    .to_string()
}
