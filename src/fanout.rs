//! Distributed fanout: cross-instance delivery through a shared pub/sub
//! broker.
//!
//! Every instance tags published envelopes with its own random instance id
//! and discards received envelopes carrying that id — the instance already
//! delivered the message locally before publishing. Received envelopes are
//! never re-published, so there is no broadcast loop. Delivery across
//! instances is at-most-once, best-effort: a broker outage only loses the
//! cross-instance leg.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::dispatch;
use crate::error::Error;
use crate::state::HubState;

/// Broker channel for message envelopes. Shares the reserved prefix that
/// room-name validation rejects, so no client room can collide with it.
pub const FANOUT_CHANNEL: &str = "#hw.fanout";

/// Origin tag for publish-only processes that hold no clients. Never equal
/// to any instance's uuid, so every live instance processes such envelopes.
pub const EMITTER_ORIGIN: &str = "#hw.emitter";

/// Where an envelope should be delivered. `None` on the envelope means
/// broadcast to all authenticated clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "target")]
pub enum Destination {
    Client(String),
    Room(String),
}

/// Unit of distributed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    pub destination: Option<Destination>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Publish/subscribe primitive over named channels with at-least-once
/// delivery to current subscribers. Redis or any other pub/sub system can
/// back this; [`InMemoryBroker`] ships for tests and single-host use.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), Error>;
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, Error>;
}

/// In-process broker over tokio broadcast channels. Instances sharing one
/// `Arc<InMemoryBroker>` see each other's traffic.
#[derive(Debug)]
pub struct InMemoryBroker {
    channels: dashmap::DashMap<String, broadcast::Sender<Vec<u8>>>,
}

/// Capacity per channel. Slow subscribers that fall behind skip messages
/// (RecvError::Lagged), consistent with best-effort delivery.
const CHANNEL_CAPACITY: usize = 4096;

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            channels: dashmap::DashMap::new(),
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), Error> {
        // send() errs only when there are no subscribers — that's fine.
        let _ = self.channel(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Vec<u8>>, Error> {
        Ok(self.channel(channel).subscribe())
    }
}

/// Deliver locally first, then publish the envelope so instances holding
/// other members of the same room/user can deliver it too.
pub async fn send(state: &HubState, destination: Option<Destination>, event: &str, data: Value) {
    deliver_local(state, &destination, event, data.clone()).await;

    let Some(broker) = &state.broker else {
        return;
    };

    let envelope = Envelope {
        origin: state.instance_id.clone(),
        destination,
        event: event.to_string(),
        data,
    };
    publish(broker.as_ref(), &envelope).await;
}

/// Run the subscriber side of this instance: receive envelopes, discard the
/// ones it originated, and hand the rest to the local dispatcher.
pub fn spawn_subscriber(state: HubState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(broker) = state.broker.clone() else {
            return;
        };
        let mut rx = match broker.subscribe(FANOUT_CHANNEL).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "fanout subscription failed");
                return;
            }
        };

        tracing::debug!(instance_id = %state.instance_id, "fanout subscriber running");

        loop {
            match rx.recv().await {
                Ok(payload) => {
                    let envelope: Envelope = match serde_json::from_slice(&payload) {
                        Ok(env) => env,
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed fanout envelope dropped");
                            continue;
                        }
                    };

                    // Loop prevention: this instance already delivered its
                    // own envelopes locally before publishing.
                    if envelope.origin == state.instance_id {
                        tracing::trace!("own envelope discarded");
                        continue;
                    }

                    deliver_local(&state, &envelope.destination, &envelope.event, envelope.data)
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "fanout subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("fanout channel closed");
                    break;
                }
            }
        }
    })
}

/// Publish-only handle for processes that never hold client connections
/// (background workers, schedulers).
#[derive(Clone)]
pub struct Emitter {
    broker: Arc<dyn Broker>,
}

impl Emitter {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn send(
        &self,
        destination: Option<Destination>,
        event: &str,
        data: Value,
    ) -> Result<(), Error> {
        let envelope = Envelope {
            origin: EMITTER_ORIGIN.to_string(),
            destination,
            event: event.to_string(),
            data,
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| Error::BrokerPublish(e.to_string()))?;
        self.broker.publish(FANOUT_CHANNEL, payload).await
    }
}

async fn deliver_local(
    state: &HubState,
    destination: &Option<Destination>,
    event: &str,
    data: Value,
) {
    match destination {
        Some(Destination::Client(client_id)) => {
            dispatch::send_to_client(state, client_id, event, data).await;
        }
        Some(Destination::Room(room)) => {
            dispatch::send_to_room(state, room, event, data, None).await;
        }
        None => {
            dispatch::broadcast(state, event, data, None).await;
        }
    }
}

async fn publish(broker: &dyn Broker, envelope: &Envelope) {
    let payload = match serde_json::to_vec(envelope) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "envelope serialization failed");
            return;
        }
    };

    // Best-effort: local delivery already happened; a broker outage only
    // loses the cross-instance leg. No queue, no retry.
    if let Err(e) = broker.publish(FANOUT_CHANNEL, payload).await {
        tracing::warn!(error = %e, "broker publish failed; cross-instance delivery skipped");
    }
}
