//! Game vocabulary shared by the engine and the wire.

use serde::{Deserialize, Serialize};

use crate::{GameId, RoomId, UserId};

/// A named stage of a game round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Night,
    Day,
    Voting,
    Ended,
}

impl Phase {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Lobby, Phase::Night)
                | (Phase::Night, Phase::Day)
                | (Phase::Night, Phase::Ended)
                | (Phase::Day, Phase::Voting)
                | (Phase::Voting, Phase::Night)
                | (Phase::Voting, Phase::Ended)
        )
    }
}

/// Coarse lifecycle of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Lobby,
    Active,
    Ended,
}

/// A team with a shared win condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Village,
    Werewolf,
    Solo,
}

/// A player's secret role, fixed at game start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Villager,
    Seer,
    Doctor,
    Werewolf,
    Jester,
}

impl Role {
    pub fn faction(self) -> Faction {
        match self {
            Role::Villager | Role::Seer | Role::Doctor => Faction::Village,
            Role::Werewolf => Faction::Werewolf,
            Role::Jester => Faction::Solo,
        }
    }

    /// The night action this role performs, if any.
    pub fn night_action(self) -> Option<NightActionKind> {
        match self {
            Role::Werewolf => Some(NightActionKind::Kill),
            Role::Doctor => Some(NightActionKind::Protect),
            Role::Seer => Some(NightActionKind::Investigate),
            Role::Villager | Role::Jester => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NightActionKind {
    Kill,
    Protect,
    Investigate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeathCause {
    /// Killed by the werewolves at night.
    Killed,
    /// Executed by the day vote.
    Executed,
}

/// A player eliminated during a phase. The role is revealed on death.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Death {
    pub player_id: UserId,
    pub role: Role,
    pub cause: DeathCause,
}

/// The outcome of a vote that eliminated someone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub player_id: UserId,
    pub role: Role,
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyEntry {
    pub target_id: UserId,
    pub votes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WinReason {
    JesterExecuted,
    WerewolvesEliminated,
    WerewolvesParity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleReveal {
    pub user_id: UserId,
    pub role: Role,
}

/// One player as seen by a particular viewer.
///
/// `role` is only filled in when the viewer is allowed to know it: their
/// own role, fellow werewolves, dead players, and everyone once the game
/// has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub user_id: UserId,
    pub username: String,
    pub alive: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_target: Option<UserId>,
}

/// The state of a game as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub game_id: GameId,
    pub room_id: RoomId,
    pub status: GameStatus,
    pub phase: Phase,
    pub day: u32,
    pub players: Vec<PlayerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_faction: Option<Faction>,
    /// Milliseconds left in the current phase, filled in by the room actor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_remaining_ms: Option<u64>,
}
