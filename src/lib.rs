//! hivewire — realtime connection and delivery core.
//!
//! Accepts persistent WebSocket connections, authenticates them
//! post-connect through an injected hook, tracks room membership, delivers
//! messages locally and across instances via a shared pub/sub broker,
//! detects dead connections with an application-level heartbeat, and
//! optionally encrypts per-client payloads end to end.
//!
//! The binary entry point in main.rs is a reference deployment; hosts
//! usually embed [`state::HubState`] + [`routes::build_router`] and wire
//! their own [`hooks::Hooks`].

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod heartbeat;
pub mod hooks;
pub mod registry;
pub mod rooms;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::Error;
