//! `reconnect`: restore a user's room seat after a dropped connection.
//!
//! The record is read, the new connection seated, and the record deleted
//! all under the connections lock. A disconnect or supersede of the same
//! user stores its fresh record either before or after that, never in
//! between.
//!
//! A player coming back to a waiting room needs a free seat like any
//! other joiner; the record is kept so the call can be retried.

use nightfall_protocol::{ErrorCode, GameId, ProtocolError, RoomId, RoomStatus, ServerMessage};
use nightfall_room::{RoomDirectory, RoomError};
use nightfall_session::{Authenticator, SessionError};
use tracing::info;

use super::ensure_registered;
use crate::NightfallError;
use crate::router::Caller;
use crate::server::{ServerState, room_state};

pub(crate) async fn reconnect<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    expected_room_id: Option<RoomId>,
    last_game_id: Option<GameId>,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let user_id = caller.user_id;
    let pending = state
        .reconnect
        .peek(user_id)
        .await
        .ok_or(SessionError::NoStoredState(user_id))?;
    let room_id = pending.room_id.ok_or(SessionError::NoStoredState(user_id))?;
    if expected_room_id.is_some_and(|expected| expected != room_id) {
        return Err(NightfallError::rejected(
            ErrorCode::ReconnectFailed,
            format!("stored room is {room_id}, not the expected one"),
        ));
    }
    let record = state
        .directory
        .room(room_id)
        .await
        .ok_or(RoomError::NotFound(room_id))?;

    let (room, spectator, stored_game) = {
        let mut connections = state.connections.lock().await;
        ensure_registered(&connections, caller)?;
        let mut rooms = state.rooms.lock().await;
        let game_running = state.games.lock().await.contains_key(&room_id);
        let seated = rooms.room(room_id).map_or(0, |c| c.players.len());
        if !pending.spectator
            && record.status == RoomStatus::Waiting
            && !game_running
            && seated >= record.capacity
        {
            return Err(NightfallError::rejected(
                ErrorCode::ReconnectFailed,
                format!("room {room_id} is full"),
            ));
        }
        let stored = state
            .reconnect
            .retrieve_state(user_id)
            .await
            .filter(|stored| stored.room_id == Some(room_id))
            .ok_or(SessionError::NoStoredState(user_id))?;

        rooms.join_room(room_id, caller.conn_id, caller.sink.clone(), stored.spectator);
        connections.set_room(caller.conn_id, Some(room_id), stored.spectator);
        state.reconnect.confirm_reconnection(user_id).await;
        rooms.broadcast(
            room_id,
            ServerMessage::PlayerJoined {
                room_id,
                user_id,
                username: caller.username.clone(),
                spectator: stored.spectator,
                reconnected: true,
            },
            Some(caller.conn_id),
        );
        (
            room_state(&connections, &rooms, &record),
            stored.spectator,
            stored.game_state,
        )
    };

    let mut game_state = stored_game;
    let live = state
        .game(room_id)
        .await
        .filter(|game| last_game_id.is_none_or(|id| id == game.game_id()));
    if let Some(game) = live {
        if game.is_player(user_id) {
            if let Err(e) = game.set_connected(user_id, true).await {
                tracing::debug!(%room_id, %user_id, error = %e, "could not mark player connected");
            }
        }
        match game.snapshot(Some(user_id)).await {
            Ok(snapshot) => {
                game_state =
                    Some(serde_json::to_value(snapshot).map_err(ProtocolError::Encode)?);
            }
            Err(e) => tracing::debug!(%room_id, error = %e, "using stored game state"),
        }
    }

    caller.reply(ServerMessage::ReconnectionSuccess {
        room,
        spectator,
        game_state,
    });
    info!(%room_id, %user_id, spectator, "reconnected");
    Ok(())
}
