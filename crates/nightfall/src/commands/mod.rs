//! Command handlers, one module per area.
//!
//! Every handler checks its own preconditions and returns an error
//! without touching shared state when one fails; the router reports it to
//! the sender.

pub(crate) mod lobby;
pub(crate) mod play;
pub(crate) mod reconnect;

use nightfall_protocol::{ErrorCode, RoomId, UserId};
use nightfall_room::{RoomDirectory, RoomError, RoomRecord};
use nightfall_session::{Authenticator, ConnectionRegistry, SessionError};

use crate::NightfallError;
use crate::router::Caller;
use crate::server::ServerState;

fn not_in_room() -> NightfallError {
    NightfallError::rejected(ErrorCode::NotInRoom, "not in a room")
}

/// Fails if the caller's connection was removed (superseded or dropped)
/// while its command was in flight. A removed connection must not be
/// seated anywhere.
pub(crate) fn ensure_registered(
    connections: &ConnectionRegistry,
    caller: &Caller,
) -> Result<(), NightfallError> {
    if connections.get(caller.conn_id).is_none() {
        return Err(SessionError::ConnectionNotFound(caller.conn_id).into());
    }
    Ok(())
}

/// The room the caller currently occupies.
pub(crate) async fn current_room<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
) -> Result<RoomId, NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    state
        .rooms
        .lock()
        .await
        .room_of(caller.conn_id)
        .ok_or_else(not_in_room)
}

/// The record of the caller's room, provided the caller hosts it.
pub(crate) async fn hosted_room<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
) -> Result<RoomRecord, NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let room_id = current_room(state, caller).await?;
    let record = state
        .directory
        .room(room_id)
        .await
        .ok_or(RoomError::NotFound(room_id))?;
    if record.host_id != caller.user_id {
        return Err(RoomError::NotHost(room_id).into());
    }
    Ok(record)
}

/// Tells a running game that `user_id` no longer has a seat in the room.
pub(crate) async fn mark_absent<A, D>(state: &ServerState<A, D>, room_id: RoomId, user_id: UserId)
where
    A: Authenticator,
    D: RoomDirectory,
{
    let Some(handle) = state.game(room_id).await else {
        return;
    };
    if !handle.is_player(user_id) {
        return;
    }
    if let Err(e) = handle.set_connected(user_id, false).await {
        tracing::debug!(%room_id, %user_id, error = %e, "could not mark player absent");
    }
}
