//! Heartbeat monitor: periodic sweep closing stale authenticated clients.
//!
//! Any inbound message counts as activity; the `heartbeat` event exists as
//! a cheap keep-alive for otherwise idle clients. Timeouts are terminal —
//! a closed client must reconnect, the server never retries.

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::state::HubState;
use crate::ws::CLOSE_HEARTBEAT_TIMEOUT;

/// Spawn the sweep task for one instance.
pub fn spawn_monitor(state: HubState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(state.settings.heartbeat_interval);
        // Skip the first immediate tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            for client_id in state
                .registry
                .stale_authenticated(state.settings.heartbeat_timeout)
            {
                tracing::warn!(
                    client_id = %client_id,
                    timeout_ms = state.settings.heartbeat_timeout.as_millis() as u64,
                    "no activity within liveness window, closing"
                );
                state
                    .registry
                    .force_close(&client_id, CLOSE_HEARTBEAT_TIMEOUT, "Heartbeat timeout");
            }
        }
    })
}
