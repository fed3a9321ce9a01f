//! HTTP router. The realtime core exposes a single upgrade endpoint; all
//! other surfaces belong to the host application.

use axum::{routing::get, Router};

use crate::state::HubState;
use crate::ws;

pub fn build_router(state: HubState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_upgrade))
        .with_state(state)
}
