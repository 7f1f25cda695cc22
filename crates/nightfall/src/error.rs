//! Unified error type for the Nightfall server.

use nightfall_game::GameError;
use nightfall_protocol::{ErrorCode, ProtocolError};
use nightfall_room::RoomError;
use nightfall_session::SessionError;
use nightfall_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Command handlers return this; the router turns it into an `error`
/// message for the sender using [`code`](Self::code).
#[derive(Debug, thiserror::Error)]
pub enum NightfallError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (malformed or unknown message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, reconnection).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (not found, full, not host).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// A game rule was violated.
    #[error(transparent)]
    Game(#[from] GameError),

    /// A precondition the server checks itself.
    #[error("{message}")]
    Rejected { code: ErrorCode, message: String },
}

impl NightfallError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// The wire error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::InternalError,
            Self::Protocol(e) => e.code(),
            Self::Session(SessionError::NoStoredState(_)) => ErrorCode::ReconnectFailed,
            Self::Session(SessionError::AuthFailed(_) | SessionError::MissingCredential) => {
                ErrorCode::Forbidden
            }
            Self::Session(_) => ErrorCode::InternalError,
            Self::Room(e) => e.code(),
            Self::Game(e) => e.code(),
            Self::Rejected { code, .. } => *code,
        }
    }
}
