//! Room lifecycle events for other processes.
//!
//! The server reports a few coarse events (a room went away, a game began
//! or ended) to an [`EventSink`]. Deployments that run several server
//! processes plug in a sink that publishes to their message bus; the
//! default discards everything.

use nightfall_protocol::{Faction, GameId, RoomId, UserId, WinReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    RoomDeleted {
        room_id: RoomId,
        reason: String,
    },
    GameStarted {
        room_id: RoomId,
        game_id: GameId,
        players: Vec<UserId>,
    },
    GameEnded {
        room_id: RoomId,
        game_id: GameId,
        winner: Faction,
        reason: WinReason,
    },
}

/// Receives [`RoomEvent`]s. Called inline, so it must not block.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: &RoomEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, event: &RoomEvent) {
        tracing::trace!(?event, "event dropped by no-op sink");
    }
}
