//! Errors raised by the game engine.

use nightfall_protocol::{ErrorCode, Phase, UserId};

/// Rejections of a game command. None of these mutate game state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("{0} is not a player in this game")]
    NotAPlayer(UserId),

    #[error("{0} is not alive")]
    NotAlive(UserId),

    #[error("not allowed during {0:?}")]
    InvalidPhase(Phase),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("already voting for {0}")]
    DuplicateVote(UserId),

    #[error("no active vote to remove")]
    NoActiveVote,

    #[error("this role cannot perform that action")]
    RoleCannotAct,

    #[error("need at least {min} players, have {have}")]
    NotEnoughPlayers { have: usize, min: usize },

    #[error("at most {max} players, have {have}")]
    TooManyPlayers { have: usize, max: usize },

    /// Internal: the state machine was asked for an illegal step.
    #[error("illegal transition {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    /// Internal: the distribution table does not add up.
    #[error("role distribution for {0} players is inconsistent")]
    BadDistribution(usize),
}

impl GameError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotAPlayer(_) => ErrorCode::NotAPlayer,
            Self::NotAlive(_) => ErrorCode::NotAlive,
            Self::InvalidPhase(_) => ErrorCode::InvalidPhase,
            Self::InvalidTarget(_) => ErrorCode::InvalidTarget,
            Self::DuplicateVote(_) => ErrorCode::DuplicateVote,
            Self::NoActiveVote => ErrorCode::NoActiveVote,
            Self::RoleCannotAct => ErrorCode::RoleCannotAct,
            Self::NotEnoughPlayers { .. } => ErrorCode::NotEnoughPlayers,
            Self::TooManyPlayers { .. } => ErrorCode::TooManyPlayers,
            Self::InvalidTransition { .. } | Self::BadDistribution(_) => ErrorCode::InternalError,
        }
    }
}
