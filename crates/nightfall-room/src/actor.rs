//! Game actor: one Tokio task per running game.
//!
//! The actor owns the [`Game`] and is the only thing that mutates it, so
//! concurrent commands for the same room (two votes, a vote racing the
//! phase timer) are applied one at a time. Phase timers live inside the
//! actor loop as a single deadline.
//!
//! A game whose players have all been disconnected for `abandon_after`
//! is abandoned: the actor reports it and stops without a winner.
//!
//! Everything the engine wants delivered goes out on the [`GameOutput`]
//! channel; the server resolves recipients to connections.

use std::time::Duration;

use nightfall_game::{Audience, Game, GameError, Outcome};
use nightfall_protocol::{
    ChatChannel, Faction, GameId, GameSnapshot, NightActionKind, Phase, RoomId, ServerMessage,
    UserId, WinReason,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::RoomError;

/// Who a game message is for, in terms the server can resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Every connection in the room.
    Room,
    Users(Vec<UserId>),
    /// The room's spectators plus these users.
    SpectatorsAnd(Vec<UserId>),
}

/// Output of a game actor.
#[derive(Debug, Clone, PartialEq)]
pub enum GameOutput {
    Deliver {
        room_id: RoomId,
        to: Recipients,
        message: ServerMessage,
    },
    /// The game reached ENDED. Sent after its final messages; the actor
    /// stops right after.
    Ended {
        room_id: RoomId,
        game_id: GameId,
        winner: Faction,
        reason: WinReason,
    },
    /// Every player stayed disconnected past the abandon timeout. The
    /// actor has stopped.
    Abandoned { room_id: RoomId, game_id: GameId },
}

pub type OutputSender = mpsc::UnboundedSender<GameOutput>;

type Reply<T> = oneshot::Sender<Result<T, GameError>>;

enum GameCommand {
    Vote {
        voter: UserId,
        target: UserId,
        reply: Reply<()>,
    },
    Unvote {
        voter: UserId,
        reply: Reply<()>,
    },
    NightAction {
        actor: UserId,
        kind: NightActionKind,
        target: UserId,
        reply: Reply<()>,
    },
    /// Close the current phase now.
    Advance { reply: Reply<()> },
    Snapshot {
        viewer: Option<UserId>,
        reply: oneshot::Sender<GameSnapshot>,
    },
    SetConnected {
        user_id: UserId,
        connected: bool,
    },
    ChatRoute {
        sender: UserId,
        reply: Reply<(ChatChannel, Recipients)>,
    },
    Shutdown,
}

/// Handle to a running game actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GameHandle {
    room_id: RoomId,
    game_id: GameId,
    players: Vec<UserId>,
    sender: mpsc::Sender<GameCommand>,
}

impl std::fmt::Debug for GameCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Vote { .. } => "Vote",
            Self::Unvote { .. } => "Unvote",
            Self::NightAction { .. } => "NightAction",
            Self::Advance { .. } => "Advance",
            Self::Snapshot { .. } => "Snapshot",
            Self::SetConnected { .. } => "SetConnected",
            Self::ChatRoute { .. } => "ChatRoute",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl GameHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// User ids seated at game start.
    pub fn players(&self) -> &[UserId] {
        &self.players
    }

    pub fn is_player(&self, user_id: UserId) -> bool {
        self.players.contains(&user_id)
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn vote(&self, voter: UserId, target: UserId) -> Result<(), RoomError> {
        self.request(|reply| GameCommand::Vote {
            voter,
            target,
            reply,
        })
        .await
    }

    pub async fn unvote(&self, voter: UserId) -> Result<(), RoomError> {
        self.request(|reply| GameCommand::Unvote { voter, reply }).await
    }

    pub async fn night_action(
        &self,
        actor: UserId,
        kind: NightActionKind,
        target: UserId,
    ) -> Result<(), RoomError> {
        self.request(|reply| GameCommand::NightAction {
            actor,
            kind,
            target,
            reply,
        })
        .await
    }

    /// Closes the current phase as if its timer had expired.
    pub async fn advance(&self) -> Result<(), RoomError> {
        self.request(|reply| GameCommand::Advance { reply }).await
    }

    /// Where a chat line from `sender` may go.
    pub async fn chat_route(&self, sender: UserId) -> Result<(ChatChannel, Recipients), RoomError> {
        self.request(|reply| GameCommand::ChatRoute { sender, reply }).await
    }

    pub async fn snapshot(&self, viewer: Option<UserId>) -> Result<GameSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::Snapshot { viewer, reply }).await?;
        rx.await.map_err(|_| RoomError::Unavailable(self.room_id))
    }

    pub async fn set_connected(&self, user_id: UserId, connected: bool) -> Result<(), RoomError> {
        self.send(GameCommand::SetConnected { user_id, connected }).await
    }

    /// Stops the actor without ending the game.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(GameCommand::Shutdown).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> GameCommand,
    ) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        let result = rx.await.map_err(|_| RoomError::Unavailable(self.room_id))?;
        Ok(result?)
    }

    async fn send(&self, command: GameCommand) -> Result<(), RoomError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }
}

struct GameActor {
    game: Game,
    /// When the current phase closes on its own. `None` while untimed.
    deadline: Option<Instant>,
    receiver: mpsc::Receiver<GameCommand>,
    output: OutputSender,
    abandon_after: Duration,
    /// When the last connected player dropped. `None` while anyone is in.
    abandoned_since: Option<Instant>,
}

impl GameActor {
    async fn run(mut self, opening: Vec<Outcome>) {
        let room_id = self.game.room_id();
        let game_id = self.game.id();
        info!(%room_id, %game_id, "game actor started");
        self.emit(opening);
        self.arm_deadline();

        loop {
            let deadline = self.deadline;
            let abandon_at = self.abandoned_since.map(|since| since + self.abandon_after);
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd) {
                        break;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!(%room_id, phase = ?self.game.phase(), "phase timer expired");
                    if let Err(e) = self.close_phase() {
                        warn!(%room_id, error = %e, "phase close failed");
                        break;
                    }
                }
                _ = sleep_until(abandon_at.unwrap_or_else(Instant::now)), if abandon_at.is_some() => {
                    info!(%room_id, %game_id, "no players left, abandoning game");
                    let _ = self.output.send(GameOutput::Abandoned { room_id, game_id });
                    break;
                }
            }
            if self.game.is_finished() {
                if let Some((winner, reason)) = self.game.winner() {
                    let _ = self.output.send(GameOutput::Ended {
                        room_id,
                        game_id,
                        winner,
                        reason,
                    });
                }
                break;
            }
        }

        info!(%room_id, %game_id, "game actor stopped");
    }

    /// Returns `false` when the actor should stop.
    fn handle(&mut self, cmd: GameCommand) -> bool {
        match cmd {
            GameCommand::Vote {
                voter,
                target,
                reply,
            } => {
                let result = self.game.cast_vote(voter, target).map(|out| self.emit(out));
                let _ = reply.send(result);
            }
            GameCommand::Unvote { voter, reply } => {
                let result = self.game.remove_vote(voter).map(|out| self.emit(out));
                let _ = reply.send(result);
            }
            GameCommand::NightAction {
                actor,
                kind,
                target,
                reply,
            } => {
                let _ = reply.send(self.game.submit_night_action(actor, kind, target));
            }
            GameCommand::Advance { reply } => {
                let _ = reply.send(self.close_phase());
            }
            GameCommand::Snapshot { viewer, reply } => {
                let _ = reply.send(self.snapshot(viewer));
            }
            GameCommand::SetConnected { user_id, connected } => {
                self.game.set_connected(user_id, connected);
                self.track_abandonment();
            }
            GameCommand::ChatRoute { sender, reply } => {
                let result = self
                    .game
                    .chat_audience(sender)
                    .map(|(channel, audience)| (channel, self.resolve(audience)));
                let _ = reply.send(result);
            }
            GameCommand::Shutdown => {
                info!(room_id = %self.game.room_id(), "game actor shutting down");
                return false;
            }
        }
        true
    }

    fn track_abandonment(&mut self) {
        if self.game.players().iter().any(|p| p.connected) {
            if self.abandoned_since.take().is_some() {
                debug!(room_id = %self.game.room_id(), "player back, abandon timer cleared");
            }
        } else if self.abandoned_since.is_none() {
            debug!(room_id = %self.game.room_id(), "all players disconnected");
            self.abandoned_since = Some(Instant::now());
        }
    }

    fn close_phase(&mut self) -> Result<(), GameError> {
        let out = self.game.advance()?;
        self.emit(out);
        self.arm_deadline();
        Ok(())
    }

    fn arm_deadline(&mut self) {
        self.deadline = match self.game.phase() {
            Phase::Night | Phase::Day | Phase::Voting => {
                Some(Instant::now() + self.game.phase_duration())
            }
            Phase::Lobby | Phase::Ended => None,
        };
    }

    fn snapshot(&self, viewer: Option<UserId>) -> GameSnapshot {
        let mut snapshot = self.game.snapshot(viewer);
        snapshot.phase_remaining_ms = self.deadline.map(|d| {
            d.saturating_duration_since(Instant::now())
                .as_millis()
                .min(u128::from(u64::MAX)) as u64
        });
        snapshot
    }

    fn resolve(&self, audience: Audience) -> Recipients {
        match audience {
            Audience::Everyone => Recipients::Room,
            Audience::Player(user_id) => Recipients::Users(vec![user_id]),
            Audience::Players(users) => Recipients::Users(users),
            Audience::Dead => Recipients::SpectatorsAnd(self.game.dead_player_ids()),
        }
    }

    fn emit(&self, outcomes: Vec<Outcome>) {
        let room_id = self.game.room_id();
        for (audience, message) in outcomes {
            let to = self.resolve(audience);
            if self
                .output
                .send(GameOutput::Deliver {
                    room_id,
                    to,
                    message,
                })
                .is_err()
            {
                warn!(%room_id, "game output channel closed, dropping message");
            }
        }
    }
}

/// Starts `game` and spawns its actor.
///
/// The game moves LOBBY → NIGHT before this returns, so a start failure
/// (already started) is reported here and nothing is spawned.
///
/// The actor gives up with [`GameOutput::Abandoned`] once no player has
/// been connected for `abandon_after`.
pub fn spawn_game(
    mut game: Game,
    output: OutputSender,
    command_buffer: usize,
    abandon_after: Duration,
) -> Result<GameHandle, GameError> {
    let opening = game.start()?;
    let (tx, rx) = mpsc::channel(command_buffer.max(1));
    let handle = GameHandle {
        room_id: game.room_id(),
        game_id: game.id(),
        players: game.user_ids(),
        sender: tx,
    };
    let actor = GameActor {
        game,
        deadline: None,
        receiver: rx,
        output,
        abandon_after,
        abandoned_since: None,
    };
    tokio::spawn(actor.run(opening));
    Ok(handle)
}
