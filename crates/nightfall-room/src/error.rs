//! Error types for the room layer.

use nightfall_game::GameError;
use nightfall_protocol::{ErrorCode, RoomId};

/// Errors that can occur during room operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// No player seat left.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("not in room {0}")]
    NotInRoom(RoomId),

    #[error("only the host of room {0} may do that")]
    NotHost(RoomId),

    /// The room is mid-game or otherwise not accepting this operation.
    #[error("room {0} has a game in progress")]
    GameInProgress(RoomId),

    #[error("no game running in room {0}")]
    GameNotFound(RoomId),

    #[error("spectating is not available in room {0}")]
    SpectatingDisabled(RoomId),

    #[error("not every player in room {0} is ready")]
    PlayersNotReady(RoomId),

    /// The game actor has stopped.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    #[error(transparent)]
    Game(#[from] GameError),
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::RoomNotFound,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::NotInRoom(_) => ErrorCode::NotInRoom,
            Self::NotHost(_) => ErrorCode::NotHost,
            Self::GameInProgress(_) => ErrorCode::GameInProgress,
            Self::GameNotFound(_) | Self::Unavailable(_) => ErrorCode::GameNotFound,
            Self::SpectatingDisabled(_) => ErrorCode::SpectatingDisabled,
            Self::PlayersNotReady(_) => ErrorCode::PlayersNotReady,
            Self::Game(e) => e.code(),
        }
    }
}
