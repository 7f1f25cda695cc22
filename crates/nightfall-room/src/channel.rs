//! The room channel registry: who is in which room, and fan-out to them.
//!
//! # Concurrency note
//!
//! Like the connection registry this type is not thread-safe by itself.
//! The server keeps it behind a `tokio::sync::Mutex` taken after the
//! connection registry lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use nightfall_protocol::{RoomId, ServerEnvelope, ServerMessage};
use nightfall_session::ConnectionSink;
use nightfall_transport::ConnectionId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Membership of one room.
#[derive(Debug, Clone)]
pub struct RoomChannel {
    pub room_id: RoomId,
    pub players: BTreeSet<ConnectionId>,
    pub spectators: BTreeSet<ConnectionId>,
    /// Players who marked themselves ready. Always a subset of `players`.
    pub ready: BTreeSet<ConnectionId>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl RoomChannel {
    fn new(room_id: RoomId, created_at: Instant) -> Self {
        Self {
            room_id,
            players: BTreeSet::new(),
            spectators: BTreeSet::new(),
            ready: BTreeSet::new(),
            created_at,
            last_activity: Instant::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.spectators.is_empty()
    }

    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.players.contains(&conn_id) || self.spectators.contains(&conn_id)
    }

    fn members(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.players.iter().chain(self.spectators.iter()).copied()
    }

    fn remove(&mut self, conn_id: ConnectionId) -> bool {
        self.ready.remove(&conn_id);
        self.players.remove(&conn_id) | self.spectators.remove(&conn_id)
    }
}

/// Result of [`RoomChannelRegistry::join_room`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Already in this room; nothing changed.
    AlreadyMember,
    /// Left `from` first, then joined.
    Moved { from: RoomId },
}

/// Counts read by [`RoomChannelRegistry::room_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    pub players: usize,
    pub spectators: usize,
    pub ready: usize,
    pub created_at: Instant,
    pub last_activity: Instant,
}

#[derive(Debug, Default)]
pub struct RoomChannelRegistry {
    rooms: HashMap<RoomId, RoomChannel>,
    /// Rooms created ahead of their first member. Not visible as channels.
    reserved: HashMap<RoomId, Instant>,
    /// Which room each connection is in. At most one.
    memberships: HashMap<ConnectionId, RoomId>,
    sinks: HashMap<ConnectionId, ConnectionSink>,
}

impl RoomChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a channel for `room_id`. Returns `false` if the channel
    /// or a reservation already exists.
    ///
    /// The channel only becomes visible once [`join_room`] seats its first
    /// member, and keeps the reservation time as `created_at`.
    ///
    /// [`join_room`]: Self::join_room
    pub fn create_room(&mut self, room_id: RoomId) -> bool {
        if self.rooms.contains_key(&room_id) || self.reserved.contains_key(&room_id) {
            debug!(%room_id, "room channel already exists");
            return false;
        }
        self.reserved.insert(room_id, Instant::now());
        true
    }

    /// Puts the connection in `room_id`, creating the channel on demand.
    ///
    /// A connection is in at most one room: joining another room leaves
    /// the current one first.
    pub fn join_room(
        &mut self,
        room_id: RoomId,
        conn_id: ConnectionId,
        sink: ConnectionSink,
        spectator: bool,
    ) -> JoinOutcome {
        let previous = self.memberships.get(&conn_id).copied();
        if previous == Some(room_id) {
            return JoinOutcome::AlreadyMember;
        }
        if let Some(from) = previous {
            self.leave_room(from, conn_id);
        }

        let reserved_at = self.reserved.remove(&room_id);
        let channel = self.rooms.entry(room_id).or_insert_with(|| {
            RoomChannel::new(room_id, reserved_at.unwrap_or_else(Instant::now))
        });
        if spectator {
            channel.spectators.insert(conn_id);
        } else {
            channel.players.insert(conn_id);
        }
        channel.last_activity = Instant::now();
        self.memberships.insert(conn_id, room_id);
        self.sinks.insert(conn_id, sink);
        info!(%room_id, %conn_id, spectator, "joined room channel");

        match previous {
            Some(from) => JoinOutcome::Moved { from },
            None => JoinOutcome::Joined,
        }
    }

    /// Removes the connection from the room. Deletes the room if it is now
    /// empty. Returns `false` if the connection was not in it.
    pub fn leave_room(&mut self, room_id: RoomId, conn_id: ConnectionId) -> bool {
        let Some(channel) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if !channel.remove(conn_id) {
            return false;
        }
        channel.last_activity = Instant::now();
        let now_empty = channel.is_empty();
        self.memberships.remove(&conn_id);
        self.sinks.remove(&conn_id);
        info!(%room_id, %conn_id, "left room channel");
        if now_empty {
            self.rooms.remove(&room_id);
            info!(%room_id, "room channel empty, removed");
        }
        true
    }

    /// Leaves whatever room the connection is in.
    pub fn leave_current(&mut self, conn_id: ConnectionId) -> Option<RoomId> {
        let room_id = self.memberships.get(&conn_id).copied()?;
        self.leave_room(room_id, conn_id);
        Some(room_id)
    }

    /// Removes the room and every membership in it. Returns the removed
    /// channel with its sinks so the caller can notify the occupants.
    pub fn delete_room(&mut self, room_id: RoomId) -> Option<(RoomChannel, Vec<ConnectionSink>)> {
        self.reserved.remove(&room_id);
        let channel = self.rooms.remove(&room_id)?;
        let sinks = channel
            .members()
            .filter_map(|conn_id| {
                self.memberships.remove(&conn_id);
                self.sinks.remove(&conn_id)
            })
            .collect();
        info!(%room_id, "room channel deleted");
        Some((channel, sinks))
    }

    pub fn room(&self, room_id: RoomId) -> Option<&RoomChannel> {
        self.rooms.get(&room_id)
    }

    pub fn room_of(&self, conn_id: ConnectionId) -> Option<RoomId> {
        self.memberships.get(&conn_id).copied()
    }

    pub fn is_spectator(&self, conn_id: ConnectionId) -> bool {
        self.room_of(conn_id)
            .and_then(|room_id| self.rooms.get(&room_id))
            .is_some_and(|channel| channel.spectators.contains(&conn_id))
    }

    pub fn contains(&self, room_id: RoomId) -> bool {
        self.rooms.contains_key(&room_id)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn sink(&self, conn_id: ConnectionId) -> Option<&ConnectionSink> {
        self.sinks.get(&conn_id)
    }

    // -----------------------------------------------------------------------
    // Ready flags
    // -----------------------------------------------------------------------

    /// Sets a player's ready flag. Returns `false` if the connection is not
    /// a player in the room.
    pub fn set_ready(&mut self, room_id: RoomId, conn_id: ConnectionId, ready: bool) -> bool {
        let Some(channel) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if !channel.players.contains(&conn_id) {
            return false;
        }
        if ready {
            channel.ready.insert(conn_id);
        } else {
            channel.ready.remove(&conn_id);
        }
        channel.last_activity = Instant::now();
        true
    }

    pub fn is_ready(&self, room_id: RoomId, conn_id: ConnectionId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|channel| channel.ready.contains(&conn_id))
    }

    /// `true` if the room has players and every one of them is ready.
    pub fn all_ready(&self, room_id: RoomId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|c| !c.players.is_empty() && c.players.len() == c.ready.len())
    }

    pub fn clear_ready(&mut self, room_id: RoomId) {
        if let Some(channel) = self.rooms.get_mut(&room_id) {
            channel.ready.clear();
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Sends `message` to every open connection in the room except
    /// `exclude`. Returns how many were handed the message.
    ///
    /// Delivery is best effort per recipient: a closed sink is logged and
    /// skipped.
    pub fn broadcast(
        &self,
        room_id: RoomId,
        message: ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let Some(channel) = self.rooms.get(&room_id) else {
            return 0;
        };
        let envelope = Arc::new(ServerEnvelope::new(message));
        let targets = channel.members().filter(|id| Some(*id) != exclude);
        self.deliver(targets, &envelope)
    }

    /// Sends `message` to the listed connections that are in the room.
    pub fn send_to(
        &self,
        room_id: RoomId,
        conn_ids: impl IntoIterator<Item = ConnectionId>,
        message: ServerMessage,
    ) -> usize {
        let Some(channel) = self.rooms.get(&room_id) else {
            return 0;
        };
        let envelope = Arc::new(ServerEnvelope::new(message));
        let targets = conn_ids.into_iter().filter(|id| channel.contains(*id));
        self.deliver(targets, &envelope)
    }

    /// Sends `message` to the room's spectators plus `extra`.
    pub fn send_to_spectators_and(
        &self,
        room_id: RoomId,
        extra: impl IntoIterator<Item = ConnectionId>,
        message: ServerMessage,
    ) -> usize {
        let Some(channel) = self.rooms.get(&room_id) else {
            return 0;
        };
        let mut targets: BTreeSet<ConnectionId> = channel.spectators.clone();
        targets.extend(extra.into_iter().filter(|id| channel.contains(*id)));
        let envelope = Arc::new(ServerEnvelope::new(message));
        self.deliver(targets.into_iter(), &envelope)
    }

    fn deliver(
        &self,
        targets: impl Iterator<Item = ConnectionId>,
        envelope: &Arc<ServerEnvelope>,
    ) -> usize {
        let mut delivered = 0;
        for conn_id in targets {
            let Some(sink) = self.sinks.get(&conn_id) else {
                continue;
            };
            match sink.send_envelope(Arc::clone(envelope)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%conn_id, error = %e, "broadcast delivery failed"),
            }
        }
        delivered
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Reads the room's counts, first dropping members whose connection is
    /// no longer open. Returns `None` if the room is gone (or pruned empty).
    pub fn room_stats(&mut self, room_id: RoomId) -> Option<RoomStats> {
        let channel = self.rooms.get(&room_id)?;
        let stale: Vec<ConnectionId> = channel
            .members()
            .filter(|id| self.sinks.get(id).is_none_or(ConnectionSink::is_closed))
            .collect();
        for conn_id in stale {
            debug!(%room_id, %conn_id, "pruning closed connection from room");
            self.leave_room(room_id, conn_id);
        }

        let channel = self.rooms.get(&room_id)?;
        Some(RoomStats {
            players: channel.players.len(),
            spectators: channel.spectators.len(),
            ready: channel.ready.len(),
            created_at: channel.created_at,
            last_activity: channel.last_activity,
        })
    }
}
