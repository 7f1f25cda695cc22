//! Background loops that run beside the accept loop.
//!
//! - heartbeat: probes every connection and drops the ones that stop
//!   answering
//! - inactivity: acts on warnings and timeouts from the idle monitor
//! - game output: delivers what game actors emit and cleans up after a
//!   game ends or is abandoned
//! - reconciler: deletes waiting rooms whose host stayed away too long
//!
//! Each loop holds a [`Weak`] reference and exits once the server state is
//! gone.

use std::collections::HashMap;
use std::sync::Weak;

use nightfall_protocol::{GameId, RoomId, RoomStatus, ServerMessage};
use nightfall_room::{GameOutput, RoomDirectory};
use nightfall_session::{Authenticator, HeartbeatConfig, InactivityEvent};
use nightfall_timer::Ticker;
use nightfall_transport::{CLOSE_HEARTBEAT_FAILED, CLOSE_INACTIVE};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::RoomEvent;
use crate::handler::release;
use crate::server::{ServerState, room_state};

pub(crate) async fn run_heartbeat<A, D>(weak: Weak<ServerState<A, D>>, config: HeartbeatConfig)
where
    A: Authenticator,
    D: RoomDirectory,
{
    if config.interval.is_zero() {
        debug!("heartbeat disabled");
        return;
    }
    let mut ticker = Ticker::every(config.interval);
    loop {
        ticker.wait().await;
        let Some(state) = weak.upgrade() else {
            break;
        };

        let mut connections = state.connections.lock().await;
        let cycle = connections.probe_cycle(config.max_missed);
        for sink in &cycle.to_ping {
            if let Err(e) = sink.ping() {
                debug!(conn_id = %sink.id(), error = %e, "probe not queued");
            }
        }
        for conn_id in cycle.dead {
            let Some(entry) = connections.remove(conn_id) else {
                continue;
            };
            warn!(%conn_id, user_id = %entry.user_id, "heartbeat failed, dropping connection");
            release(&state, &entry).await;
            let _ = entry.sink.close(CLOSE_HEARTBEAT_FAILED, "heartbeat failed");
        }
    }
}

pub(crate) async fn run_inactivity<A, D>(
    weak: Weak<ServerState<A, D>>,
    mut events: mpsc::UnboundedReceiver<InactivityEvent>,
) where
    A: Authenticator,
    D: RoomDirectory,
{
    while let Some(event) = events.recv().await {
        let Some(state) = weak.upgrade() else {
            break;
        };
        match event {
            InactivityEvent::Warning {
                conn_id,
                remaining,
                warning,
            } => {
                let connections = state.connections.lock().await;
                if let Some(entry) = connections.get(conn_id) {
                    let _ = entry.sink.send(ServerMessage::InactivityWarning {
                        remaining_secs: remaining.as_secs(),
                        warning,
                    });
                }
            }
            InactivityEvent::Timeout { conn_id } => {
                let mut connections = state.connections.lock().await;
                let Some(entry) = connections.remove(conn_id) else {
                    continue;
                };
                info!(%conn_id, user_id = %entry.user_id, "closing idle connection");
                release(&state, &entry).await;
                let _ = entry.sink.close(CLOSE_INACTIVE, "inactive");
            }
        }
    }
}

pub(crate) async fn run_game_output<A, D>(
    weak: Weak<ServerState<A, D>>,
    mut outputs: mpsc::UnboundedReceiver<GameOutput>,
) where
    A: Authenticator,
    D: RoomDirectory,
{
    while let Some(output) = outputs.recv().await {
        let Some(state) = weak.upgrade() else {
            break;
        };
        match output {
            GameOutput::Deliver {
                room_id,
                to,
                message,
            } => state.deliver(room_id, &to, message).await,
            GameOutput::Ended {
                room_id,
                game_id,
                winner,
                reason,
            } => {
                reopen_room(&state, room_id, game_id).await;
                state.events.publish(&RoomEvent::GameEnded {
                    room_id,
                    game_id,
                    winner,
                    reason,
                });
                info!(%room_id, %game_id, ?winner, "game ended, room back to waiting");
            }
            GameOutput::Abandoned { room_id, game_id } => {
                reopen_room(&state, room_id, game_id).await;
                info!(%room_id, %game_id, "game abandoned, room back to waiting");
            }
        }
    }
}

/// Drops the finished game and puts its room back to `Waiting`.
async fn reopen_room<A, D>(state: &ServerState<A, D>, room_id: RoomId, game_id: GameId)
where
    A: Authenticator,
    D: RoomDirectory,
{
    {
        let mut games = state.games.lock().await;
        if games.get(&room_id).is_some_and(|g| g.game_id() == game_id) {
            games.remove(&room_id);
        }
    }
    state
        .directory
        .set_status(room_id, RoomStatus::Waiting)
        .await;
    if let Some(record) = state.directory.room(room_id).await {
        let connections = state.connections.lock().await;
        let mut rooms = state.rooms.lock().await;
        rooms.clear_ready(room_id);
        let room = room_state(&connections, &rooms, &record);
        rooms.broadcast(room_id, ServerMessage::RoomUpdated { room }, None);
    }
}

pub(crate) async fn run_reconciler<A, D>(weak: Weak<ServerState<A, D>>)
where
    A: Authenticator,
    D: RoomDirectory,
{
    let Some(config) = weak.upgrade().map(|s| s.config.room.clone()) else {
        return;
    };
    let mut ticker = Ticker::every(config.reconcile_interval);
    // When each room was first seen without its host.
    let mut missing: HashMap<RoomId, Instant> = HashMap::new();

    loop {
        ticker.wait().await;
        let Some(state) = weak.upgrade() else {
            break;
        };

        let room_ids = state.rooms.lock().await.room_ids();
        missing.retain(|room_id, _| room_ids.contains(room_id));

        for room_id in room_ids {
            let Some(record) = state.directory.room(room_id).await else {
                missing.remove(&room_id);
                continue;
            };
            if record.status != RoomStatus::Waiting {
                missing.remove(&room_id);
                continue;
            }

            let host_present = {
                let connections = state.connections.lock().await;
                let rooms = state.rooms.lock().await;
                connections
                    .find_by_user(record.host_id)
                    .is_some_and(|entry| rooms.room_of(entry.id) == Some(room_id))
            };
            if host_present {
                missing.remove(&room_id);
                continue;
            }

            let since = *missing.entry(room_id).or_insert_with(Instant::now);
            if since.elapsed() > config.host_grace {
                missing.remove(&room_id);
                delete_room(&state, room_id, "host left").await;
            }
        }
    }
}

/// Removes a room everywhere and tells its occupants.
pub(crate) async fn delete_room<A, D>(state: &ServerState<A, D>, room_id: RoomId, reason: &str)
where
    A: Authenticator,
    D: RoomDirectory,
{
    {
        let mut connections = state.connections.lock().await;
        let mut rooms = state.rooms.lock().await;
        if let Some((channel, sinks)) = rooms.delete_room(room_id) {
            for conn_id in channel.players.iter().chain(&channel.spectators) {
                connections.set_room(*conn_id, None, false);
            }
            for sink in sinks {
                let _ = sink.send(ServerMessage::RoomDeleted {
                    room_id,
                    reason: reason.to_string(),
                });
            }
        }
    }

    let game = state.games.lock().await.remove(&room_id);
    if let Some(game) = game {
        let _ = game.shutdown().await;
    }
    state.directory.delete_room(room_id).await;
    state.events.publish(&RoomEvent::RoomDeleted {
        room_id,
        reason: reason.to_string(),
    });
    info!(%room_id, reason, "room deleted");
}
