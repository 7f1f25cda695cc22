//! Per-connection handler: credential check, registration, and the read
//! loop.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that drains the connection's [`ConnectionSink`]. The
//! flow is:
//!   1. Extract the bearer credential → authenticate (close 1008 on failure)
//!   2. Register → supersede any older connection of the same user
//!   3. Send `connected`
//!   4. Loop: receive frames → record activity → route
//!   5. On exit: remove from the registry and release room/game seats,
//!      then wait briefly for the peer's close reply if we closed first

use std::sync::Arc;
use std::time::Duration;

use nightfall_protocol::{Codec, JsonCodec, LeaveReason, ServerMessage};
use nightfall_room::RoomDirectory;
use nightfall_session::{
    Authenticator, ConnectionEntry, ConnectionSink, Identity, Outbound, SessionError, Snapshot,
    extract_credential,
};
use nightfall_transport::{
    CLOSE_POLICY_VIOLATION, CLOSE_SUPERSEDED, Connection, ConnectionId, Frame,
    WebSocketConnection,
};
use tokio::sync::mpsc;

use crate::NightfallError;
use crate::router;
use crate::server::ServerState;

/// How long a connection we closed waits for the peer's close reply.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, D>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, D>>,
) -> Result<(), NightfallError>
where
    A: Authenticator,
    D: RoomDirectory,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Credential ---
    let identity = match authenticate(&conn, &state.auth).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::info!(%conn_id, error = %e, "rejecting unauthenticated connection");
            conn.close(CLOSE_POLICY_VIOLATION, "authentication required")
                .await?;
            linger(&conn).await;
            return Err(e.into());
        }
    };
    let user_id = identity.user_id;
    let username = identity.username.clone();
    tracing::info!(%conn_id, %user_id, "user authenticated");

    // --- Step 2: Writer and registration ---
    let conn = Arc::new(conn);
    let (sink, outbound) = ConnectionSink::channel(conn_id);
    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), outbound));

    {
        let mut connections = state.connections.lock().await;
        if let Some(old) = connections.register(conn_id, identity, sink.clone(), None) {
            release(&state, &old).await;
            let _ = old.sink.close(CLOSE_SUPERSEDED, "superseded by a newer connection");
        }
    }
    state.inactivity.track(conn_id);

    let pending = state.reconnect.peek(user_id).await;
    let _ = sink.send(ServerMessage::Connected {
        user_id,
        username,
        connection_id: conn_id.into_inner(),
        reconnect_available: pending.is_some(),
        pending_room_id: pending.and_then(|record| record.room_id),
    });

    // --- Step 3: Read loop ---
    let mut closing = false;
    loop {
        let frame = tokio::select! {
            frame = conn.recv() => frame,
            _ = &mut writer => {
                tracing::debug!(%conn_id, "writer finished, ending read loop");
                closing = true;
                break;
            }
        };
        match frame {
            Ok(Some(Frame::Pong)) => {
                state.connections.lock().await.mark_alive(conn_id);
            }
            Ok(Some(Frame::Data(data))) => {
                if !state.connections.lock().await.touch(conn_id) {
                    tracing::debug!(%conn_id, "message from unregistered connection dropped");
                    continue;
                }
                state.inactivity.record_activity(conn_id);
                router::route(&state, conn_id, &data).await;
            }
            Ok(None) => {
                tracing::info!(%conn_id, %user_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        }
    }

    // --- Step 4: Cleanup ---
    disconnect(&state, conn_id).await;
    if closing {
        linger(&conn).await;
    } else {
        writer.abort();
    }
    Ok(())
}

/// Keeps reading after our close frame went out until the peer answers
/// it, so the peer can flush its queued replies and see the close code.
async fn linger(conn: &WebSocketConnection) {
    let drain = async { while let Ok(Some(_)) = conn.recv().await {} };
    if tokio::time::timeout(CLOSE_LINGER, drain).await.is_err() {
        tracing::debug!(conn_id = %conn.id(), "peer never answered close");
    }
}

async fn authenticate<A: Authenticator>(
    conn: &WebSocketConnection,
    auth: &A,
) -> Result<Identity, SessionError> {
    let credential = extract_credential(conn.handshake()).ok_or(SessionError::MissingCredential)?;
    auth.authenticate(&credential).await
}

/// Drains the sink onto the socket until a close is requested or the
/// socket fails.
async fn write_loop(conn: Arc<WebSocketConnection>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let conn_id = conn.id();
    while let Some(item) = outbound.recv().await {
        let result = match item {
            Outbound::Message(envelope) => match JsonCodec.encode(envelope.as_ref()) {
                Ok(bytes) => conn.send(&bytes).await,
                Err(e) => {
                    tracing::warn!(%conn_id, error = %e, "failed to encode outbound message");
                    continue;
                }
            },
            Outbound::Ping => conn.ping().await,
            Outbound::Close { code, reason } => {
                if let Err(e) = conn.close(code, &reason).await {
                    tracing::debug!(%conn_id, error = %e, "close frame not delivered");
                }
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!(%conn_id, error = %e, "send failed, stopping writer");
            break;
        }
    }
}

/// Removes the connection and releases whatever it held. A no-op if it
/// was already removed (superseded, timed out, or dropped by heartbeat).
pub(crate) async fn disconnect<A, D>(state: &ServerState<A, D>, conn_id: ConnectionId)
where
    A: Authenticator,
    D: RoomDirectory,
{
    let mut connections = state.connections.lock().await;
    if let Some(entry) = connections.remove(conn_id) {
        release(state, &entry).await;
    }
}

/// Frees the seats a removed connection held.
///
/// Stops inactivity tracking, leaves the room channel (telling the other
/// occupants), marks the user disconnected in a running game, and stores a
/// reconnection snapshot if there was a room to come back to.
///
/// Callers hold the connections lock, so a reconnect for the same user
/// cannot interleave.
pub(crate) async fn release<A, D>(state: &ServerState<A, D>, entry: &ConnectionEntry)
where
    A: Authenticator,
    D: RoomDirectory,
{
    state.inactivity.untrack(entry.id);

    let left = {
        let mut rooms = state.rooms.lock().await;
        let spectator = rooms.is_spectator(entry.id);
        let room_id = rooms.leave_current(entry.id);
        if let Some(room_id) = room_id {
            rooms.broadcast(
                room_id,
                ServerMessage::PlayerLeft {
                    room_id,
                    user_id: entry.user_id,
                    reason: LeaveReason::Disconnected,
                },
                None,
            );
        }
        room_id.map(|room_id| (room_id, spectator))
    };
    let Some((room_id, spectator)) = left else {
        tracing::debug!(conn_id = %entry.id, user_id = %entry.user_id, "released connection held no room");
        return;
    };

    let mut game_state = None;
    if let Some(handle) = state.game(room_id).await {
        if handle.is_player(entry.user_id) {
            if let Err(e) = handle.set_connected(entry.user_id, false).await {
                tracing::debug!(%room_id, user_id = %entry.user_id, error = %e, "could not mark player disconnected");
            }
        }
        match handle.snapshot(Some(entry.user_id)).await {
            Ok(snapshot) => game_state = serde_json::to_value(snapshot).ok(),
            Err(e) => tracing::debug!(%room_id, error = %e, "no game snapshot for reconnection"),
        }
    }

    state
        .reconnect
        .store_state(
            entry.user_id,
            Snapshot {
                room_id: Some(room_id),
                game_state,
                spectator,
            },
        )
        .await;
    tracing::info!(user_id = %entry.user_id, %room_id, "connection released, reconnection window open");
}
