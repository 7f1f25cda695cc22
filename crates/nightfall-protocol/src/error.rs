//! Protocol errors and the wire-level error codes.

use serde::{Deserialize, Serialize};

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes were not a well-formed envelope.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The envelope was well-formed but its `data` did not fit the type.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The envelope named a `type` the server does not handle.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ProtocolError {
    /// The error code reported to the client for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Encode(_) => ErrorCode::InternalError,
            Self::Decode(_) | Self::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Self::UnknownType(_) => ErrorCode::UnknownMessageType,
        }
    }
}

/// Structured error codes carried by outbound `error` messages.
///
/// Every rejected command maps to exactly one of these, so clients can
/// branch on the code and treat the message text as display-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    UnknownMessageType,
    NotInRoom,
    RoomNotFound,
    RoomFull,
    NotHost,
    NotAPlayer,
    NotAlive,
    InvalidPhase,
    InvalidTarget,
    DuplicateVote,
    NoActiveVote,
    RoleCannotAct,
    GameInProgress,
    GameNotFound,
    NotEnoughPlayers,
    TooManyPlayers,
    PlayersNotReady,
    SpectatingDisabled,
    ReconnectFailed,
    Forbidden,
    InternalError,
}
