use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::FutureExt;
use rand::Rng;
use tokio::net::TcpListener;

use hivewire::config::{generate_config_template, Config};
use hivewire::gateway::EncryptionGateway;
use hivewire::hooks::{AuthOutcome, Hooks};
use hivewire::state::HubState;
use hivewire::{heartbeat, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "hivewire=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "hivewire=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("hivewire v{} starting", env!("CARGO_PKG_VERSION"));

    // Shared token for the reference authenticate hook. Generated per boot
    // when unset so an unconfigured server is never open to everyone.
    let token = match config.auth_token.clone() {
        Some(token) if !token.is_empty() => token,
        _ => {
            let generated: [u8; 16] = rand::rng().random();
            let token = hex::encode(generated);
            tracing::warn!(token = %token, "no auth token configured; generated one for this boot");
            token
        }
    };

    let gateway = EncryptionGateway::new();
    let mut hooks = Hooks::new();

    // Token check; user identity rides alongside in the same payload.
    let expected = token.clone();
    hooks.authenticate = Some(Arc::new(move |payload| {
        let expected = expected.clone();
        async move {
            let presented = payload.get("token").and_then(|t| t.as_str());
            if presented != Some(expected.as_str()) {
                return Ok(None);
            }
            let user_id = payload
                .get("user_id")
                .and_then(|u| u.as_str())
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            Ok(Some(AuthOutcome {
                user_id,
                metadata: None,
            }))
        }
        .boxed()
    }));

    // Allow-list room validation; an empty list stays fail-closed.
    if !config.allowed_rooms.is_empty() {
        let allowed = config.allowed_rooms.clone();
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

    if config.require_encryption {
        hooks.handshake = Some(EncryptionGateway::x25519_hook());
        hooks.transform = Some(gateway.transform_hook());
    }

    let state = HubState::new(config.settings(), hooks).with_gateway(gateway);

    let monitor = heartbeat::spawn_monitor(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, instance_id = %state.instance_id, "hivewire listening");

    let app = routes::build_router(state.clone());

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_state.shutdown();
        })
        .await?;

    monitor.abort();
    Ok(())
}
