//! In-game commands: votes, night actions, chat, and the debug
//! force-phase.

use nightfall_protocol::{ChatChannel, ErrorCode, NightActionKind, RoomId, ServerMessage, UserId};
use nightfall_room::{GameHandle, Recipients, RoomDirectory, RoomError};
use nightfall_session::Authenticator;

use super::{current_room, hosted_room};
use crate::NightfallError;
use crate::router::Caller;
use crate::server::ServerState;

async fn running_game<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
) -> Result<GameHandle, NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let room_id = current_room(state, caller).await?;
    state
        .game(room_id)
        .await
        .ok_or_else(|| RoomError::GameNotFound(room_id).into())
}

pub(crate) async fn vote<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    target: UserId,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let game = running_game(state, caller).await?;
    game.vote(caller.user_id, target).await?;
    Ok(())
}

pub(crate) async fn unvote<A, D>(state: &ServerState<A, D>, caller: &Caller) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let game = running_game(state, caller).await?;
    game.unvote(caller.user_id).await?;
    Ok(())
}

pub(crate) async fn night_action<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    kind: NightActionKind,
    target: UserId,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let game = running_game(state, caller).await?;
    game.night_action(caller.user_id, kind, target).await?;
    Ok(())
}

/// `chat-message`. The running game, if any, decides the channel and who
/// hears it.
pub(crate) async fn chat<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    message: &str,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let text = message.trim();
    let max = state.config.room.max_chat_len;
    if text.is_empty() || text.chars().count() > max {
        return Err(NightfallError::rejected(
            ErrorCode::InvalidMessage,
            format!("chat messages must be 1 to {max} characters"),
        ));
    }

    let room_id = current_room(state, caller).await?;
    let (channel, to) = chat_route(state, room_id, caller.user_id).await?;
    state
        .deliver(
            room_id,
            &to,
            ServerMessage::ChatMessage {
                room_id,
                user_id: caller.user_id,
                username: caller.username.clone(),
                message: text.to_string(),
                channel,
            },
        )
        .await;
    Ok(())
}

async fn chat_route<A, D>(
    state: &ServerState<A, D>,
    room_id: RoomId,
    sender: UserId,
) -> Result<(ChatChannel, Recipients), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let Some(game) = state.game(room_id).await else {
        return Ok((ChatChannel::Room, Recipients::Room));
    };
    match game.chat_route(sender).await {
        Ok(route) => Ok(route),
        // Ended between the lookup and the request.
        Err(RoomError::Unavailable(_)) => Ok((ChatChannel::Room, Recipients::Room)),
        Err(e) => Err(e.into()),
    }
}

/// `force-phase`. Closes the current phase now. Debug only.
pub(crate) async fn force_phase<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    if !state.config.allow_force_phase {
        return Err(NightfallError::rejected(
            ErrorCode::Forbidden,
            "force-phase is disabled on this server",
        ));
    }
    let record = hosted_room(state, caller).await?;
    let game = state
        .game(record.room_id)
        .await
        .ok_or(RoomError::GameNotFound(record.room_id))?;
    game.advance().await?;
    tracing::info!(room_id = %record.room_id, host = %caller.user_id, "phase forced");
    Ok(())
}
