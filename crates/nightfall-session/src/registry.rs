//! The connection registry: every admitted socket and who owns it.
//!
//! # Concurrency note
//!
//! `ConnectionRegistry` is not thread-safe by itself. The server keeps it
//! behind a `tokio::sync::Mutex` and always takes that lock before the
//! room and reconnection locks, so a disconnect racing a reconnect for the
//! same user is applied in a consistent order.
//!
//! Removing an entry here does not by itself snapshot the connection's
//! room or stop its inactivity timers; the server's disconnect routine
//! does both using the entry [`remove`](ConnectionRegistry::remove)
//! returns.

use std::collections::HashMap;

use nightfall_protocol::{RoomId, UserId};
use nightfall_transport::ConnectionId;
use tokio::time::Instant;

use crate::{ConnectionSink, Identity};

/// One admitted connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub sink: ConnectionSink,
    /// Cleared when a heartbeat probe goes out, set again by any inbound
    /// frame. A connection with this flag down is considered dead.
    pub alive: bool,
    /// Consecutive heartbeat cycles without an answer.
    pub missed_probes: u32,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub room_id: Option<RoomId>,
    pub spectator: bool,
}

/// Connection ids in one room, split by seat kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomConnections {
    pub players: Vec<ConnectionId>,
    pub spectators: Vec<ConnectionId>,
}

/// Outcome of one heartbeat cycle.
#[derive(Debug, Default)]
pub struct ProbeCycle {
    /// Connections to probe now.
    pub to_ping: Vec<ConnectionSink>,
    /// Connections that missed too many probes and should be dropped.
    pub dead: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
    by_user: HashMap<UserId, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a connection for `identity`.
    ///
    /// A user has at most one live connection. If one already exists it is
    /// removed and returned so the caller can treat it as disconnected and
    /// close it.
    pub fn register(
        &mut self,
        id: ConnectionId,
        identity: Identity,
        sink: ConnectionSink,
        room_hint: Option<RoomId>,
    ) -> Option<ConnectionEntry> {
        let superseded = self
            .by_user
            .get(&identity.user_id)
            .copied()
            .filter(|existing| *existing != id)
            .and_then(|existing| self.remove(existing));

        if let Some(old) = &superseded {
            tracing::info!(
                user_id = %identity.user_id,
                old = %old.id,
                new = %id,
                "connection superseded by newer session"
            );
        }

        let now = Instant::now();
        self.by_user.insert(identity.user_id, id);
        self.entries.insert(
            id,
            ConnectionEntry {
                id,
                user_id: identity.user_id,
                username: identity.username,
                sink,
                alive: true,
                missed_probes: 0,
                connected_at: now,
                last_activity: now,
                room_id: room_hint,
                spectator: false,
            },
        );
        superseded
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionEntry> {
        self.entries.get(&id)
    }

    /// Removes and returns the entry, for downstream snapshotting.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.entries.remove(&id)?;
        if self.by_user.get(&entry.user_id) == Some(&id) {
            self.by_user.remove(&entry.user_id);
        }
        Some(entry)
    }

    pub fn find_by_user(&self, user_id: UserId) -> Option<&ConnectionEntry> {
        self.by_user
            .get(&user_id)
            .and_then(|id| self.entries.get(id))
    }

    pub fn list_all(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.entries.values()
    }

    pub fn list_by_room(&self, room_id: RoomId) -> RoomConnections {
        let mut out = RoomConnections::default();
        for entry in self.entries.values() {
            if entry.room_id != Some(room_id) {
                continue;
            }
            if entry.spectator {
                out.spectators.push(entry.id);
            } else {
                out.players.push(entry.id);
            }
        }
        out.players.sort();
        out.spectators.sort();
        out
    }

    /// Records an answered probe. Returns `false` for unknown ids.
    pub fn mark_alive(&mut self, id: ConnectionId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.alive = true;
                entry.missed_probes = 0;
                true
            }
            None => false,
        }
    }

    pub fn mark_dead(&mut self, id: ConnectionId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.alive = false;
                true
            }
            None => false,
        }
    }

    /// Records inbound application traffic, which also proves liveness.
    pub fn touch(&mut self, id: ConnectionId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                entry.alive = true;
                entry.missed_probes = 0;
                true
            }
            None => false,
        }
    }

    /// Updates the connection's room association.
    pub fn set_room(&mut self, id: ConnectionId, room_id: Option<RoomId>, spectator: bool) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.room_id = room_id;
                entry.spectator = room_id.is_some() && spectator;
                true
            }
            None => false,
        }
    }

    /// Runs one heartbeat cycle over every connection.
    ///
    /// A connection that answered since the last cycle is probed again. One
    /// that did not is marked dead and counts a miss; after `max_missed`
    /// consecutive misses it is reported in [`ProbeCycle::dead`] instead of
    /// being probed.
    pub fn probe_cycle(&mut self, max_missed: u32) -> ProbeCycle {
        let mut cycle = ProbeCycle::default();
        for entry in self.entries.values_mut() {
            if entry.alive {
                entry.missed_probes = 0;
            } else {
                entry.missed_probes += 1;
            }
            if entry.missed_probes >= max_missed {
                cycle.dead.push(entry.id);
            } else {
                entry.alive = false;
                cycle.to_ping.push(entry.sink.clone());
            }
        }
        cycle.dead.sort();
        cycle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
