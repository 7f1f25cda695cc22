//! Role distribution table and assignment.

use nightfall_protocol::Role;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::GameError;

pub const MIN_PLAYERS: usize = 5;
pub const MAX_PLAYERS: usize = 12;

/// Role counts for one player count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Distribution {
    pub werewolf: usize,
    pub seer: usize,
    pub doctor: usize,
    pub jester: usize,
    pub villager: usize,
}

impl Distribution {
    pub fn total(&self) -> usize {
        self.werewolf + self.seer + self.doctor + self.jester + self.villager
    }

    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::Werewolf => self.werewolf,
            Role::Seer => self.seer,
            Role::Doctor => self.doctor,
            Role::Jester => self.jester,
            Role::Villager => self.villager,
        }
    }

    /// The roles as a flat, unshuffled list.
    pub fn roles(&self) -> Vec<Role> {
        [
            Role::Werewolf,
            Role::Seer,
            Role::Doctor,
            Role::Jester,
            Role::Villager,
        ]
        .into_iter()
        .flat_map(|role| std::iter::repeat_n(role, self.count(role)))
        .collect()
    }
}

const fn row(werewolf: usize, jester: usize, villager: usize) -> Distribution {
    Distribution {
        werewolf,
        seer: 1,
        doctor: 1,
        jester,
        villager,
    }
}

/// Indexed by `player_count - MIN_PLAYERS`.
const TABLE: [Distribution; MAX_PLAYERS - MIN_PLAYERS + 1] = [
    row(1, 0, 2), // 5
    row(2, 0, 2), // 6
    row(2, 1, 2), // 7
    row(2, 1, 3), // 8
    row(2, 1, 4), // 9
    row(3, 1, 4), // 10
    row(3, 1, 5), // 11
    row(3, 1, 6), // 12
];

/// Looks up the distribution for a player count.
pub fn distribution(player_count: usize) -> Option<Distribution> {
    let index = player_count.checked_sub(MIN_PLAYERS)?;
    TABLE.get(index).copied()
}

/// Returns one role per player, shuffled.
///
/// # Errors
/// [`GameError::NotEnoughPlayers`] / [`GameError::TooManyPlayers`] outside
/// the supported range, [`GameError::BadDistribution`] if the table row
/// does not sum to the player count.
pub fn assign_roles<R: Rng + ?Sized>(
    player_count: usize,
    rng: &mut R,
) -> Result<Vec<Role>, GameError> {
    if player_count < MIN_PLAYERS {
        return Err(GameError::NotEnoughPlayers {
            have: player_count,
            min: MIN_PLAYERS,
        });
    }
    let dist = distribution(player_count).ok_or(GameError::TooManyPlayers {
        have: player_count,
        max: MAX_PLAYERS,
    })?;
    if dist.total() != player_count {
        return Err(GameError::BadDistribution(player_count));
    }
    let mut roles = dist.roles();
    roles.shuffle(rng);
    Ok(roles)
}
