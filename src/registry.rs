//! Connection registry: the authoritative map of connection id -> client
//! record, plus the user-id index for multi-session delivery.
//!
//! Mutated concurrently by connection actors, the heartbeat monitor, and the
//! fanout subscriber; DashMap gives lock-free access consistent with the
//! rest of the crate's shared state.

use std::time::Duration;

use dashmap::DashMap;
use std::sync::Arc;

use crate::client::{Client, ClientInfo, ClientState};
use crate::ws::{close_message, ConnectionSender};

/// Shared handle over all live client records.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Arc<DashMap<String, Client>>,
    /// user id -> connection ids. A user may hold several simultaneous
    /// sessions; removal uses vec-retain.
    by_user: Arc<DashMap<String, Vec<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            by_user: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn state_of(&self, client_id: &str) -> Option<ClientState> {
        self.clients.get(client_id).map(|c| c.state)
    }

    pub fn snapshot(&self, client_id: &str) -> Option<ClientInfo> {
        self.clients.get(client_id).map(|c| ClientInfo::from(&*c))
    }

    /// Record inbound activity for the heartbeat monitor.
    pub fn touch(&self, client_id: &str) {
        if let Some(mut client) = self.clients.get_mut(client_id) {
            client.last_activity = std::time::Instant::now();
        }
    }

    /// Move `Unauthorized -> Authenticating`. Returns false if the client is
    /// gone or not in a state that allows an authentication attempt.
    pub fn begin_authentication(&self, client_id: &str) -> bool {
        match self.clients.get_mut(client_id) {
            Some(mut client) if client.state == ClientState::Unauthorized => {
                client.state = ClientState::Authenticating;
                true
            }
            _ => false,
        }
    }

    /// Reject path: `Authenticating -> Unauthorized`. The auth timer keeps
    /// running — a failed attempt does not grant extra time.
    pub fn revert_authentication(&self, client_id: &str) {
        if let Some(mut client) = self.clients.get_mut(client_id) {
            if client.state == ClientState::Authenticating {
                client.state = ClientState::Unauthorized;
            }
        }
    }

    /// Success path: cancel the auth timer, move to `Authenticated`, bind the
    /// identity, and index the connection under its user id.
    pub fn complete_authentication(
        &self,
        client_id: &str,
        user_id: String,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let bound = match self.clients.get_mut(client_id) {
            Some(mut client) if client.state == ClientState::Authenticating => {
                if let Some(timer) = client.auth_timer.take() {
                    timer.abort();
                }
                client.state = ClientState::Authenticated;
                client.user_id = Some(user_id.clone());
                client.metadata = metadata;
                client.last_activity = std::time::Instant::now();
                true
            }
            _ => false,
        };

        if bound {
            self.by_user
                .entry(user_id)
                .or_default()
                .push(client_id.to_string());
        }
        bound
    }

    pub fn mark_encrypted(&self, client_id: &str) {
        if let Some(mut client) = self.clients.get_mut(client_id) {
            client.encrypted = true;
        }
    }

    pub fn is_encrypted(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .map(|c| c.encrypted)
            .unwrap_or(false)
    }

    /// Remove a client exactly once. Aborts its auth timer, unindexes its
    /// user id, and returns the record with `state = Disconnected` so the
    /// caller can run the disconnect hook against the final snapshot.
    pub fn remove(&self, client_id: &str) -> Option<Client> {
        let (_, mut client) = self.clients.remove(client_id)?;

        if let Some(timer) = client.auth_timer.take() {
            timer.abort();
        }

        if let Some(user_id) = &client.user_id {
            let mut remove_user = false;
            if let Some(mut ids) = self.by_user.get_mut(user_id) {
                ids.retain(|id| id != client_id);
                remove_user = ids.is_empty();
            }
            if remove_user {
                self.by_user.remove(user_id);
            }
        }

        client.state = ClientState::Disconnected;
        Some(client)
    }

    /// Connection ids currently indexed under a user id.
    pub fn clients_of_user(&self, user_id: &str) -> Vec<String> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Sender for a client, but only while it is eligible for delivery.
    pub fn deliverable_sender(&self, client_id: &str) -> Option<ConnectionSender> {
        self.clients.get(client_id).and_then(|c| {
            if c.state == ClientState::Authenticated {
                Some(c.sender.clone())
            } else {
                None
            }
        })
    }

    /// All authenticated connection ids, minus an optional exclusion.
    pub fn authenticated_ids(&self, exclude: Option<&str>) -> Vec<String> {
        self.clients
            .iter()
            .filter(|e| e.value().state == ClientState::Authenticated)
            .filter(|e| Some(e.key().as_str()) != exclude)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Senders for the native broadcast path: authenticated and not
    /// encrypted (encrypted clients only receive via the transform path).
    pub fn multicast_senders(&self, exclude: Option<&str>) -> Vec<ConnectionSender> {
        self.clients
            .iter()
            .filter(|e| e.value().state == ClientState::Authenticated && !e.value().encrypted)
            .filter(|e| Some(e.key().as_str()) != exclude)
            .map(|e| e.value().sender.clone())
            .collect()
    }

    /// Authenticated clients with no inbound activity within `timeout`.
    pub fn stale_authenticated(&self, timeout: Duration) -> Vec<String> {
        self.clients
            .iter()
            .filter(|e| {
                e.value().state == ClientState::Authenticated
                    && e.value().last_activity.elapsed() > timeout
            })
            .map(|e| e.key().clone())
            .collect()
    }

    /// Push a Close frame with a taxonomy code to one client. The actor's
    /// reader loop observes the closure and runs the normal disconnect path.
    pub fn force_close(&self, client_id: &str, code: u16, reason: &str) {
        if let Some(client) = self.clients.get(client_id) {
            let _ = client.sender.send(close_message(code, reason));
        }
    }

    /// Push a Close frame to every live connection (graceful shutdown).
    pub fn close_all(&self, code: u16, reason: &str) {
        for entry in self.clients.iter() {
            let _ = entry.value().sender.send(close_message(code, reason));
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
