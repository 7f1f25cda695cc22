//! Room membership and game start: join, spectate, leave, ready, kick,
//! start.

use nightfall_game::{Game, Seat};
use nightfall_protocol::{ErrorCode, LeaveReason, RoomId, RoomStatus, ServerMessage, UserId};
use nightfall_room::{RoomChannelRegistry, RoomDirectory, RoomError, spawn_game};
use nightfall_session::{Authenticator, ConnectionRegistry};
use tracing::info;

use super::{ensure_registered, hosted_room, mark_absent, not_in_room};
use crate::router::Caller;
use crate::server::{ServerState, room_state};
use crate::{NightfallError, RoomEvent};

/// Leaves the caller's current room and tells whoever is left.
fn leave_locked(
    connections: &mut ConnectionRegistry,
    rooms: &mut RoomChannelRegistry,
    caller: &Caller,
    reason: LeaveReason,
) -> Option<RoomId> {
    let room_id = rooms.leave_current(caller.conn_id)?;
    connections.set_room(caller.conn_id, None, false);
    rooms.broadcast(
        room_id,
        ServerMessage::PlayerLeft {
            room_id,
            user_id: caller.user_id,
            reason,
        },
        None,
    );
    Some(room_id)
}

/// `join-room` and `spectate-room`.
///
/// Joining the room the caller is already in changes nothing and repeats
/// the `room-joined` reply. Joining another room leaves the current one
/// first.
pub(crate) async fn join<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    room_id: RoomId,
    spectator: bool,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let record = state
        .directory
        .room(room_id)
        .await
        .ok_or(RoomError::NotFound(room_id))?;

    let previous = {
        let mut connections = state.connections.lock().await;
        ensure_registered(&connections, caller)?;
        let mut rooms = state.rooms.lock().await;
        let game_running = state.games.lock().await.contains_key(&room_id);

        if rooms.room_of(caller.conn_id) == Some(room_id) {
            caller.reply(ServerMessage::RoomJoined {
                room: room_state(&connections, &rooms, &record),
                spectator: rooms.is_spectator(caller.conn_id),
            });
            return Ok(());
        }

        let channel = rooms.room(room_id);
        if spectator {
            let watching = channel.map_or(0, |c| c.spectators.len());
            if !state.config.room.spectator_slot_free(watching) {
                return Err(RoomError::SpectatingDisabled(room_id).into());
            }
        } else {
            if record.status != RoomStatus::Waiting || game_running {
                return Err(RoomError::GameInProgress(room_id).into());
            }
            if channel.map_or(0, |c| c.players.len()) >= record.capacity {
                return Err(RoomError::RoomFull(room_id).into());
            }
        }

        let previous = leave_locked(&mut connections, &mut rooms, caller, LeaveReason::Left);
        rooms.join_room(room_id, caller.conn_id, caller.sink.clone(), spectator);
        connections.set_room(caller.conn_id, Some(room_id), spectator);

        caller.reply(ServerMessage::RoomJoined {
            room: room_state(&connections, &rooms, &record),
            spectator,
        });
        rooms.broadcast(
            room_id,
            ServerMessage::PlayerJoined {
                room_id,
                user_id: caller.user_id,
                username: caller.username.clone(),
                spectator,
                reconnected: false,
            },
            Some(caller.conn_id),
        );
        previous
    };

    if let Some(from) = previous {
        mark_absent(state, from, caller.user_id).await;
    }
    info!(%room_id, user_id = %caller.user_id, spectator, "joined room");
    Ok(())
}

/// `leave-room` and `stop-spectating`.
pub(crate) async fn leave<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    spectating: bool,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let room_id = {
        let mut connections = state.connections.lock().await;
        let mut rooms = state.rooms.lock().await;
        if spectating && !rooms.is_spectator(caller.conn_id) {
            return Err(NightfallError::rejected(
                ErrorCode::NotInRoom,
                "not spectating a room",
            ));
        }
        let room_id = leave_locked(&mut connections, &mut rooms, caller, LeaveReason::Left)
            .ok_or_else(not_in_room)?;
        caller.reply(ServerMessage::RoomLeft { room_id });
        room_id
    };

    mark_absent(state, room_id, caller.user_id).await;
    info!(%room_id, user_id = %caller.user_id, "left room");
    Ok(())
}

/// `player-ready`.
pub(crate) async fn set_ready<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    ready: bool,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let mut rooms = state.rooms.lock().await;
    let room_id = rooms.room_of(caller.conn_id).ok_or_else(not_in_room)?;
    if rooms.is_spectator(caller.conn_id) {
        return Err(NightfallError::rejected(
            ErrorCode::NotAPlayer,
            "spectators cannot ready up",
        ));
    }
    if state.games.lock().await.contains_key(&room_id) {
        return Err(RoomError::GameInProgress(room_id).into());
    }

    rooms.set_ready(room_id, caller.conn_id, ready);
    rooms.broadcast(
        room_id,
        ServerMessage::PlayerReady {
            room_id,
            user_id: caller.user_id,
            ready,
        },
        None,
    );
    Ok(())
}

/// `kick-player`. Host only, lobby only.
pub(crate) async fn kick<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    player_id: UserId,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let record = hosted_room(state, caller).await?;
    let room_id = record.room_id;
    if player_id == caller.user_id {
        return Err(NightfallError::rejected(
            ErrorCode::InvalidTarget,
            "cannot kick yourself",
        ));
    }

    let mut connections = state.connections.lock().await;
    let mut rooms = state.rooms.lock().await;
    if record.status != RoomStatus::Waiting || state.games.lock().await.contains_key(&room_id) {
        return Err(RoomError::GameInProgress(room_id).into());
    }

    let target = connections
        .find_by_user(player_id)
        .map(|entry| entry.id)
        .filter(|id| rooms.room_of(*id) == Some(room_id))
        .ok_or_else(|| {
            NightfallError::rejected(
                ErrorCode::NotInRoom,
                format!("{player_id} is not in this room"),
            )
        })?;

    let sink = rooms.sink(target).cloned();
    rooms.leave_room(room_id, target);
    connections.set_room(target, None, false);
    if let Some(sink) = sink {
        let _ = sink.send(ServerMessage::Kicked { room_id });
    }
    rooms.broadcast(
        room_id,
        ServerMessage::PlayerLeft {
            room_id,
            user_id: player_id,
            reason: LeaveReason::Kicked,
        },
        None,
    );
    info!(%room_id, host = %caller.user_id, kicked = %player_id, "player kicked");
    Ok(())
}

/// `start-game`. Host only; every seated player must be ready.
pub(crate) async fn start_game<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let record = hosted_room(state, caller).await?;
    let room_id = record.room_id;

    let handle = {
        let connections = state.connections.lock().await;
        let rooms = state.rooms.lock().await;
        let mut games = state.games.lock().await;
        if games.contains_key(&room_id) {
            return Err(RoomError::GameInProgress(room_id).into());
        }

        let seats: Vec<Seat> = rooms
            .room(room_id)
            .map(|channel| {
                channel
                    .players
                    .iter()
                    .filter_map(|id| connections.get(*id))
                    .map(|entry| Seat {
                        user_id: entry.user_id,
                        username: entry.username.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let game = Game::new(
            state.next_game_id(),
            room_id,
            seats,
            state.config.room.phase_timings.clone(),
            &mut rand::rng(),
        )?;
        if !rooms.all_ready(room_id) {
            return Err(RoomError::PlayersNotReady(room_id).into());
        }

        let handle = spawn_game(
            game,
            state.game_output.clone(),
            state.config.room.command_buffer,
            state.config.reconnect.ttl,
        )?;
        games.insert(room_id, handle.clone());
        handle
    };

    state
        .directory
        .set_status(room_id, RoomStatus::Playing)
        .await;
    state.events.publish(&RoomEvent::GameStarted {
        room_id,
        game_id: handle.game_id(),
        players: handle.players().to_vec(),
    });
    info!(%room_id, game_id = %handle.game_id(), players = handle.players().len(), "game started");
    Ok(())
}
