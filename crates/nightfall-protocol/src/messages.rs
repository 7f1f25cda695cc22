//! Message envelopes and the closed inbound/outbound message sets.
//!
//! Both directions share one envelope shape:
//!
//! ```json
//! { "type": "vote", "data": { "targetId": 4 }, "timestamp": 1700000000000, "messageId": "m-12" }
//! ```
//!
//! Inbound decoding happens in two stages. The bytes are first parsed
//! into an [`InboundEnvelope`] (fails → `INVALID_MESSAGE`), then the
//! `type` selects a [`ClientMessage`] variant and `data` is parsed into
//! its fields (unknown type → `UNKNOWN_MESSAGE_TYPE`, bad fields →
//! `INVALID_MESSAGE`). Handlers only ever see the typed variant.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    Death, ErrorCode, Execution, Faction, GameId, NightActionKind,
    Phase, ProtocolError, Role, RoleReveal, RoomId, TallyEntry, UserId, WinReason,
};

/// Milliseconds since the Unix epoch, used for envelope timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The untyped first stage of an inbound message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Every command a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    JoinRoom { room_id: RoomId },
    LeaveRoom,
    SpectateRoom { room_id: RoomId },
    StopSpectating,
    PlayerReady { ready: bool },
    StartGame,
    KickPlayer { player_id: UserId },
    Vote { target_id: UserId },
    Unvote,
    NightAction { kind: NightActionKind, target_id: UserId },
    ChatMessage { message: String },
    Reconnect {
        expected_room_id: Option<RoomId>,
        last_game_id: Option<GameId>,
    },
    /// Debug-only: close the current phase immediately.
    ForcePhase,
    Ping,
    Pong,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRef {
    room_id: RoomId,
}

#[derive(Deserialize)]
struct ReadyData {
    ready: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRef {
    player_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetRef {
    target_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NightActionData {
    kind: NightActionKind,
    target_id: UserId,
}

#[derive(Deserialize)]
struct ChatData {
    message: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconnectData {
    #[serde(default)]
    expected_room_id: Option<RoomId>,
    #[serde(default)]
    last_game_id: Option<GameId>,
}

fn fields<T: DeserializeOwned>(
    kind: &str,
    data: Option<serde_json::Value>,
) -> Result<T, ProtocolError> {
    let data = data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data)
        .map_err(|e| ProtocolError::InvalidMessage(format!("{kind}: {e}")))
}

impl ClientMessage {
    /// Builds a typed message from an envelope's `type` and `data`.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownType`] for an unrecognised `type`,
    /// [`ProtocolError::InvalidMessage`] when `data` does not fit.
    pub fn from_parts(
        kind: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Self, ProtocolError> {
        let msg = match kind {
            "join-room" => {
                let RoomRef { room_id } = fields(kind, data)?;
                Self::JoinRoom { room_id }
            }
            "leave-room" => Self::LeaveRoom,
            "spectate-room" => {
                let RoomRef { room_id } = fields(kind, data)?;
                Self::SpectateRoom { room_id }
            }
            "stop-spectating" => Self::StopSpectating,
            "player-ready" => {
                let ReadyData { ready } = fields(kind, data)?;
                Self::PlayerReady { ready }
            }
            "start-game" => Self::StartGame,
            "kick-player" => {
                let PlayerRef { player_id } = fields(kind, data)?;
                Self::KickPlayer { player_id }
            }
            "vote" => {
                let TargetRef { target_id } = fields(kind, data)?;
                Self::Vote { target_id }
            }
            "unvote" => Self::Unvote,
            "night-action" => {
                let NightActionData { kind, target_id } = fields(kind, data)?;
                Self::NightAction { kind, target_id }
            }
            "chat-message" => {
                let ChatData { message } = fields(kind, data)?;
                Self::ChatMessage { message }
            }
            "reconnect" => {
                let ReconnectData {
                    expected_room_id,
                    last_game_id,
                } = match data {
                    None | Some(serde_json::Value::Null) => ReconnectData::default(),
                    data => fields(kind, data)?,
                };
                Self::Reconnect {
                    expected_room_id,
                    last_game_id,
                }
            }
            "force-phase" => Self::ForcePhase,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };
        Ok(msg)
    }

    /// The wire `type` of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::SpectateRoom { .. } => "spectate-room",
            Self::StopSpectating => "stop-spectating",
            Self::PlayerReady { .. } => "player-ready",
            Self::StartGame => "start-game",
            Self::KickPlayer { .. } => "kick-player",
            Self::Vote { .. } => "vote",
            Self::Unvote => "unvote",
            Self::NightAction { .. } => "night-action",
            Self::ChatMessage { .. } => "chat-message",
            Self::Reconnect { .. } => "reconnect",
            Self::ForcePhase => "force-phase",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Lifecycle state of a room in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// A room occupant as listed in room state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: UserId,
    pub username: String,
    pub ready: bool,
}

/// Public view of a room: metadata plus who is in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room_id: RoomId,
    pub host_id: UserId,
    pub capacity: usize,
    pub status: RoomStatus,
    pub players: Vec<Member>,
    pub spectators: Vec<Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveReason {
    Left,
    Disconnected,
    Kicked,
}

/// Audience of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatChannel {
    Room,
    Werewolf,
    Dead,
}

/// Every notification the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Connected {
        user_id: UserId,
        username: String,
        connection_id: u64,
        reconnect_available: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        pending_room_id: Option<RoomId>,
    },
    RoomJoined {
        room: RoomState,
        spectator: bool,
    },
    RoomLeft {
        room_id: RoomId,
    },
    PlayerJoined {
        room_id: RoomId,
        user_id: UserId,
        username: String,
        spectator: bool,
        reconnected: bool,
    },
    PlayerLeft {
        room_id: RoomId,
        user_id: UserId,
        reason: LeaveReason,
    },
    PlayerReady {
        room_id: RoomId,
        user_id: UserId,
        ready: bool,
    },
    RoomUpdated {
        room: RoomState,
    },
    RoomDeleted {
        room_id: RoomId,
        reason: String,
    },
    Kicked {
        room_id: RoomId,
    },
    GameStarted {
        game_id: GameId,
        room_id: RoomId,
        player_ids: Vec<UserId>,
        phase: Phase,
        day: u32,
    },
    RoleAssigned {
        role: Role,
        faction: Faction,
        teammates: Vec<UserId>,
    },
    #[serde(rename = "phase:changed")]
    PhaseChanged {
        phase: Phase,
        day: u32,
        duration_ms: u64,
    },
    DayResults {
        day: u32,
        deaths: Vec<Death>,
    },
    VotingResults {
        day: u32,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        executed: Option<Execution>,
        tally: Vec<TallyEntry>,
        tie: bool,
    },
    VoteCast {
        voter_id: UserId,
        target_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        previous_target_id: Option<UserId>,
    },
    VoteRemoved {
        voter_id: UserId,
        target_id: UserId,
    },
    InvestigationResult {
        target_id: UserId,
        faction: Faction,
    },
    GameEnded {
        game_id: GameId,
        winning_faction: Faction,
        reason: WinReason,
        roles: Vec<RoleReveal>,
    },
    ChatMessage {
        room_id: RoomId,
        user_id: UserId,
        username: String,
        message: String,
        channel: ChatChannel,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    ReconnectionSuccess {
        room: RoomState,
        spectator: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        game_state: Option<serde_json::Value>,
    },
    InactivityWarning {
        remaining_secs: u64,
        warning: u32,
    },
    ActivityPong,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// An outbound message stamped with a send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<String>,
}

impl ServerEnvelope {
    pub fn new(message: ServerMessage) -> Self {
        Self {
            message,
            timestamp: unix_millis(),
            message_id: None,
        }
    }

    /// Echoes the id of the inbound message this one answers.
    pub fn in_reply_to(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}
