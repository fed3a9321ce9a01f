//! Room membership index.
//!
//! Rooms exist implicitly from the moment any client joins and are pruned
//! the moment their membership empties; there is no create/destroy API.
//! Each room tracks two sets: logical `members` (drives per-client
//! transform delivery) and `multicast` (native-path eligibility — encrypted
//! clients are removed from it while remaining members).

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

/// Reserved prefix for internal broker channel names. Room names starting
/// with it are rejected.
pub const INTERNAL_PREFIX: &str = "#hw.";

/// Maximum accepted room name length.
pub const MAX_ROOM_NAME_LEN: usize = 256;

#[derive(Debug, Default)]
struct RoomEntry {
    members: HashSet<String>,
    multicast: HashSet<String>,
}

/// Validate a room name. Invalid names make join a silent no-op — the
/// server never reveals which rooms exist through accept/reject behavior.
/// The length limit is in characters, not bytes.
pub fn valid_room_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_ROOM_NAME_LEN
        && !name.starts_with(INTERNAL_PREFIX)
}

/// Shared bidirectional room name <-> connection id index.
#[derive(Debug, Clone)]
pub struct RoomIndex {
    rooms: Arc<DashMap<String, RoomEntry>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Add a client to a room. `multicast_eligible` is false for clients
    /// already flipped to encrypted delivery. Returns false (and changes
    /// nothing) for invalid names.
    pub fn join(&self, client_id: &str, room: &str, multicast_eligible: bool) -> bool {
        if !valid_room_name(room) {
            tracing::debug!(room = %room, "join dropped: invalid room name");
            return false;
        }

        let mut entry = self.rooms.entry(room.to_string()).or_default();
        entry.members.insert(client_id.to_string());
        if multicast_eligible {
            entry.multicast.insert(client_id.to_string());
        }
        true
    }

    /// Idempotent removal; prunes the room when its membership empties.
    pub fn leave(&self, client_id: &str, room: &str) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.members.remove(client_id);
            entry.multicast.remove(client_id);
            if entry.members.is_empty() {
                drop(entry);
                self.rooms.remove(room);
            }
        }
    }

    /// Remove a client from every room it is in (disconnect path).
    /// Returns the rooms it was a member of.
    pub fn leave_all(&self, client_id: &str) -> Vec<String> {
        let mut left = Vec::new();

        // Collect names first to avoid holding shard locks during mutation.
        let names: Vec<String> = self.rooms.iter().map(|e| e.key().clone()).collect();

        for room in names {
            if let Some(mut entry) = self.rooms.get_mut(&room) {
                if entry.members.remove(client_id) {
                    left.push(room.clone());
                }
                entry.multicast.remove(client_id);
                if entry.members.is_empty() {
                    drop(entry);
                    self.rooms.remove(&room);
                }
            }
        }

        left
    }

    /// Current member id set of a room.
    pub fn members_of(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|e| e.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Members eligible for the native multicast path.
    pub fn multicast_of(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|e| e.multicast.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, client_id: &str) -> bool {
        self.rooms
            .get(room)
            .map(|e| e.members.contains(client_id))
            .unwrap_or(false)
    }

    /// Flip a client out of the native path in every room it belongs to,
    /// including its own id-room. Membership itself is untouched: the client
    /// keeps receiving room traffic, individually, through the transform.
    pub fn remove_from_multicast(&self, client_id: &str) {
        for mut entry in self.rooms.iter_mut() {
            entry.multicast.remove(client_id);
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomIndex {
    fn default() -> Self {
        Self::new()
    }
}
