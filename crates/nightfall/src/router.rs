//! Message router: the single entry point for every inbound command.
//!
//! Decoding is validated once here; handlers only see a typed
//! [`ClientMessage`]. Any handler error becomes an `error` reply to the
//! sender alone, and a panicking handler is caught and reported as
//! `INTERNAL_ERROR` without tearing down the connection.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use nightfall_protocol::{
    ClientMessage, Codec, ErrorCode, InboundEnvelope, JsonCodec, ServerMessage, UserId,
};
use nightfall_room::RoomDirectory;
use nightfall_session::{Authenticator, ConnectionSink};
use nightfall_transport::ConnectionId;

use crate::NightfallError;
use crate::commands::{lobby, play, reconnect};
use crate::server::{ServerState, reply};

/// The connection a command came from.
pub(crate) struct Caller {
    pub(crate) conn_id: ConnectionId,
    pub(crate) user_id: UserId,
    pub(crate) username: String,
    pub(crate) sink: ConnectionSink,
    pub(crate) message_id: Option<String>,
}

impl Caller {
    /// Sends a direct reply, echoing the inbound message id.
    pub(crate) fn reply(&self, message: ServerMessage) {
        reply(&self.sink, self.message_id.clone(), message);
    }

    fn reject(&self, err: &NightfallError) {
        self.reply(ServerMessage::error(err.code(), err.to_string()));
    }
}

/// Decodes one inbound frame and runs its handler.
pub(crate) async fn route<A, D>(state: &ServerState<A, D>, conn_id: ConnectionId, data: &[u8])
where
    A: Authenticator,
    D: RoomDirectory,
{
    let caller = {
        let connections = state.connections.lock().await;
        let Some(entry) = connections.get(conn_id) else {
            return;
        };
        Caller {
            conn_id,
            user_id: entry.user_id,
            username: entry.username.clone(),
            sink: entry.sink.clone(),
            message_id: None,
        }
    };

    let envelope: InboundEnvelope = match JsonCodec.decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "malformed envelope");
            caller.reply(ServerMessage::error(
                ErrorCode::InvalidMessage,
                "message must be an object with a string type",
            ));
            return;
        }
    };
    let caller = Caller {
        message_id: envelope.message_id,
        ..caller
    };

    let message = match ClientMessage::from_parts(&envelope.kind, envelope.data) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(%conn_id, kind = %envelope.kind, error = %e, "rejected message");
            caller.reject(&NightfallError::from(e));
            return;
        }
    };

    let kind = message.kind();
    tracing::debug!(%conn_id, user_id = %caller.user_id, kind, "dispatching");
    match AssertUnwindSafe(dispatch(state, &caller, message))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(%conn_id, kind, code = ?e.code(), error = %e, "command rejected");
            caller.reject(&e);
        }
        Err(_) => {
            tracing::error!(%conn_id, kind, "handler panicked");
            caller.reply(ServerMessage::error(
                ErrorCode::InternalError,
                "internal error",
            ));
        }
    }
}

async fn dispatch<A, D>(
    state: &ServerState<A, D>,
    caller: &Caller,
    message: ClientMessage,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    match message {
        ClientMessage::JoinRoom { room_id } => lobby::join(state, caller, room_id, false).await,
        ClientMessage::SpectateRoom { room_id } => lobby::join(state, caller, room_id, true).await,
        ClientMessage::LeaveRoom => lobby::leave(state, caller, false).await,
        ClientMessage::StopSpectating => lobby::leave(state, caller, true).await,
        ClientMessage::PlayerReady { ready } => lobby::set_ready(state, caller, ready).await,
        ClientMessage::KickPlayer { player_id } => lobby::kick(state, caller, player_id).await,
        ClientMessage::StartGame => lobby::start_game(state, caller).await,
        ClientMessage::Vote { target_id } => play::vote(state, caller, target_id).await,
        ClientMessage::Unvote => play::unvote(state, caller).await,
        ClientMessage::NightAction { kind, target_id } => {
            play::night_action(state, caller, kind, target_id).await
        }
        ClientMessage::ChatMessage { message } => play::chat(state, caller, &message).await,
        ClientMessage::ForcePhase => play::force_phase(state, caller).await,
        ClientMessage::Reconnect {
            expected_room_id,
            last_game_id,
        } => reconnect::reconnect(state, caller, expected_room_id, last_game_id).await,
        ClientMessage::Ping => {
            caller.reply(ServerMessage::ActivityPong);
            Ok(())
        }
        ClientMessage::Pong => Ok(()),
    }
}
