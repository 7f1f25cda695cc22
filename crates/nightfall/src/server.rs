//! `NightfallServer` builder, shared state, and the accept loop.
//!
//! This is the entry point for running a Nightfall server. It ties
//! together all the layers: transport → protocol → session → room → game.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nightfall_protocol::{
    GameId, Member, RoomId, RoomState, ServerEnvelope, ServerMessage, UserId,
};
use nightfall_room::{
    GameHandle, GameOutput, OutputSender, Recipients, RoomChannelRegistry, RoomDirectory,
    RoomRecord,
};
use nightfall_session::{
    Authenticator, ConnectionRegistry, ConnectionSink, InactivityEvent, InactivityMonitor,
    ReconnectionStore,
};
use nightfall_transport::{ConnectionId, Transport, WebSocketTransport};
use tokio::sync::{Mutex, mpsc};

use crate::handler::handle_connection;
use crate::supervisor;
use crate::{EventSink, NightfallError, NoopEventSink, ServerConfig};

/// Shared server state passed to every connection task and background
/// loop.
///
/// # Lock order
///
/// `connections` → `rooms` → `games`. The reconnection store locks
/// internally and is only touched after the registries. Directory and
/// game-actor calls never take these locks, so awaiting them while
/// holding one is safe.
pub(crate) struct ServerState<A, D> {
    pub(crate) config: ServerConfig,
    pub(crate) connections: Mutex<ConnectionRegistry>,
    pub(crate) rooms: Mutex<RoomChannelRegistry>,
    pub(crate) games: Mutex<HashMap<RoomId, GameHandle>>,
    pub(crate) reconnect: ReconnectionStore,
    pub(crate) inactivity: InactivityMonitor,
    pub(crate) directory: D,
    pub(crate) auth: A,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) game_output: OutputSender,
    next_game_id: AtomicU64,
}

impl<A, D> ServerState<A, D>
where
    A: Authenticator,
    D: RoomDirectory,
{
    pub(crate) fn next_game_id(&self) -> GameId {
        GameId(self.next_game_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The game running in `room_id`, if any.
    pub(crate) async fn game(&self, room_id: RoomId) -> Option<GameHandle> {
        self.games.lock().await.get(&room_id).cloned()
    }

    /// Resolves `to` against the registries and sends `message`.
    pub(crate) async fn deliver(&self, room_id: RoomId, to: &Recipients, message: ServerMessage) {
        let connections = self.connections.lock().await;
        let rooms = self.rooms.lock().await;
        let conns_of = |users: &[UserId]| -> Vec<ConnectionId> {
            users
                .iter()
                .filter_map(|u| connections.find_by_user(*u).map(|e| e.id))
                .collect()
        };
        match to {
            Recipients::Room => rooms.broadcast(room_id, message, None),
            Recipients::Users(users) => rooms.send_to(room_id, conns_of(users), message),
            Recipients::SpectatorsAnd(users) => {
                rooms.send_to_spectators_and(room_id, conns_of(users), message)
            }
        };
    }
}

/// Builds the public view of a room from the registries and its record.
pub(crate) fn room_state(
    connections: &ConnectionRegistry,
    rooms: &RoomChannelRegistry,
    record: &RoomRecord,
) -> RoomState {
    let mut state = RoomState {
        room_id: record.room_id,
        host_id: record.host_id,
        capacity: record.capacity,
        status: record.status,
        players: Vec::new(),
        spectators: Vec::new(),
    };
    let Some(channel) = rooms.room(record.room_id) else {
        return state;
    };
    let member = |id: &ConnectionId| {
        connections.get(*id).map(|e| Member {
            user_id: e.user_id,
            username: e.username.clone(),
            ready: channel.ready.contains(id),
        })
    };
    state.players = channel.players.iter().filter_map(member).collect();
    state.spectators = channel.spectators.iter().filter_map(member).collect();
    state
}

/// Sends a direct reply on `sink`, echoing the inbound message id.
pub(crate) fn reply(sink: &ConnectionSink, message_id: Option<String>, message: ServerMessage) {
    let envelope = ServerEnvelope::new(message).in_reply_to(message_id);
    if let Err(e) = sink.send_envelope(Arc::new(envelope)) {
        tracing::debug!(conn_id = %sink.id(), error = %e, "reply dropped");
    }
}

/// Builder for configuring and starting a Nightfall server.
///
/// # Example
///
/// ```rust,ignore
/// let server = NightfallServer::builder()
///     .bind("0.0.0.0:8080")
///     .config(ServerConfig::default())
///     .build(my_auth, InMemoryDirectory::new())
///     .await?;
/// server.run().await
/// ```
pub struct NightfallServerBuilder {
    bind_addr: String,
    config: ServerConfig,
    events: Arc<dyn EventSink>,
}

impl NightfallServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: ServerConfig::default(),
            events: Arc::new(NoopEventSink),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where room lifecycle events are published.
    pub fn event_sink(mut self, sink: impl EventSink) -> Self {
        self.events = Arc::new(sink);
        self
    }

    /// Binds the listener and assembles the server state.
    pub async fn build<A, D>(
        self,
        auth: A,
        directory: D,
    ) -> Result<NightfallServer<A, D>, NightfallError>
    where
        A: Authenticator,
        D: RoomDirectory,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let config = self.config.validated();
        let (inactivity, inactivity_events) = InactivityMonitor::new(config.inactivity.clone());
        let (game_output, game_events) = mpsc::unbounded_channel();

        let state = Arc::new(ServerState {
            connections: Mutex::new(ConnectionRegistry::new()),
            rooms: Mutex::new(RoomChannelRegistry::new()),
            games: Mutex::new(HashMap::new()),
            reconnect: ReconnectionStore::new(config.reconnect.clone()),
            inactivity,
            directory,
            auth,
            events: self.events,
            game_output,
            next_game_id: AtomicU64::new(1),
            config,
        });

        Ok(NightfallServer {
            transport,
            state,
            inactivity_events,
            game_events,
        })
    }
}

impl Default for NightfallServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Nightfall server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct NightfallServer<A, D> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, D>>,
    inactivity_events: mpsc::UnboundedReceiver<InactivityEvent>,
    game_events: mpsc::UnboundedReceiver<GameOutput>,
}

impl NightfallServer<(), ()> {
    /// Creates a new builder.
    pub fn builder() -> NightfallServerBuilder {
        NightfallServerBuilder::new()
    }
}

impl<A, D> NightfallServer<A, D>
where
    A: Authenticator,
    D: RoomDirectory,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Starts the background loops and runs the accept loop.
    ///
    /// Background loops hold only a weak reference to the server state and
    /// stop once the server is dropped.
    pub async fn run(mut self) -> Result<(), NightfallError> {
        let weak = Arc::downgrade(&self.state);
        tokio::spawn(supervisor::run_heartbeat(
            weak.clone(),
            self.state.config.heartbeat.clone(),
        ));
        tokio::spawn(supervisor::run_inactivity(weak.clone(), self.inactivity_events));
        tokio::spawn(supervisor::run_game_output(weak.clone(), self.game_events));
        tokio::spawn(supervisor::run_reconciler(weak));

        tracing::info!("Nightfall server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
