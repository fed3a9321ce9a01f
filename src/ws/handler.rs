//! WebSocket upgrade endpoint.
//!
//! The upgrade carries no credentials: the transport connection is accepted
//! before any identity check, decoupling transport acceptance from business
//! authentication (token schemes and handshake-bundled key exchange both
//! ride the post-connect `authenticate` event). The auth timer in the actor
//! bounds what an unauthenticated connection can cost.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::state::HubState;
use crate::ws::actor;

/// GET /ws — upgrade and hand the socket to the connection actor.
pub async fn ws_upgrade(State(state): State<HubState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| actor::run_connection(socket, state))
}
