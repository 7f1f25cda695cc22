//! The per-room game state machine.

use std::collections::HashMap;

use nightfall_protocol::{
    ChatChannel, Death, DeathCause, Execution, Faction, GameId, GameSnapshot, GameStatus,
    NightActionKind, Phase, PlayerView, Role, RoleReveal, RoomId, ServerMessage, TallyEntry,
    UserId, WinReason,
};
use rand::Rng;
use tracing::{debug, info};

use crate::{GameError, PhaseTimings, assign_roles, distribution};

/// A player as they sit down at game start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
    pub alive: bool,
    pub connected: bool,
    /// Current vote target during VOTING.
    pub vote: Option<UserId>,
}

/// A submitted night action. Consumed when the night closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightAction {
    pub actor: UserId,
    pub kind: NightActionKind,
    pub target: UserId,
    pub night: u32,
}

/// Who a message produced by the engine is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every player and spectator in the room.
    Everyone,
    Player(UserId),
    Players(Vec<UserId>),
    /// Dead players plus the room's spectators.
    Dead,
}

pub type Outcome = (Audience, ServerMessage);

#[derive(Debug, Clone)]
pub struct Game {
    id: GameId,
    room_id: RoomId,
    timings: PhaseTimings,
    players: Vec<Player>,
    phase: Phase,
    day: u32,
    status: GameStatus,
    winner: Option<(Faction, WinReason)>,
    /// One slot per action kind; the werewolf pack shares the kill slot.
    night_actions: HashMap<NightActionKind, NightAction>,
    last_protected: Option<UserId>,
}

impl Game {
    /// Seats the players in the lobby and deals roles from the table.
    pub fn new<R: Rng + ?Sized>(
        id: GameId,
        room_id: RoomId,
        seats: Vec<Seat>,
        timings: PhaseTimings,
        rng: &mut R,
    ) -> Result<Self, GameError> {
        let roles = assign_roles(seats.len(), rng)?;
        Ok(Self::seated(id, room_id, seats.into_iter().zip(roles).collect(), timings))
    }

    /// Seats players with pre-chosen roles.
    ///
    /// The role counts must still match the distribution table for the
    /// player count.
    pub fn with_roles(
        id: GameId,
        room_id: RoomId,
        assignment: Vec<(Seat, Role)>,
        timings: PhaseTimings,
    ) -> Result<Self, GameError> {
        let n = assignment.len();
        let dist = distribution(n).ok_or(if n < crate::MIN_PLAYERS {
            GameError::NotEnoughPlayers {
                have: n,
                min: crate::MIN_PLAYERS,
            }
        } else {
            GameError::TooManyPlayers {
                have: n,
                max: crate::MAX_PLAYERS,
            }
        })?;
        let mut expected = dist.roles();
        let mut given: Vec<Role> = assignment.iter().map(|(_, r)| *r).collect();
        expected.sort_by_key(|r| *r as u8);
        given.sort_by_key(|r| *r as u8);
        if expected != given {
            return Err(GameError::BadDistribution(n));
        }
        Ok(Self::seated(id, room_id, assignment, timings))
    }

    fn seated(
        id: GameId,
        room_id: RoomId,
        assignment: Vec<(Seat, Role)>,
        timings: PhaseTimings,
    ) -> Self {
        let players = assignment
            .into_iter()
            .map(|(seat, role)| Player {
                user_id: seat.user_id,
                username: seat.username,
                role,
                alive: true,
                connected: true,
                vote: None,
            })
            .collect();
        Self {
            id,
            room_id,
            timings,
            players,
            phase: Phase::Lobby,
            day: 0,
            status: GameStatus::Lobby,
            winner: None,
            night_actions: HashMap::new(),
            last_protected: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn winner(&self) -> Option<(Faction, WinReason)> {
        self.winner
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Ended
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, user_id: UserId) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    fn player_mut(&mut self, user_id: UserId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.players.iter().map(|p| p.user_id).collect()
    }

    pub fn dead_player_ids(&self) -> Vec<UserId> {
        self.players
            .iter()
            .filter(|p| !p.alive)
            .map(|p| p.user_id)
            .collect()
    }

    /// Length of the current phase.
    pub fn phase_duration(&self) -> std::time::Duration {
        self.timings.duration(self.phase)
    }

    pub fn night_action(&self, kind: NightActionKind) -> Option<&NightAction> {
        self.night_actions.get(&kind)
    }

    pub fn set_connected(&mut self, user_id: UserId, connected: bool) -> bool {
        match self.player_mut(user_id) {
            Some(p) => {
                p.connected = connected;
                true
            }
            None => false,
        }
    }

    fn require_alive(&self, user_id: UserId) -> Result<&Player, GameError> {
        let player = self.player(user_id).ok_or(GameError::NotAPlayer(user_id))?;
        if !player.alive {
            return Err(GameError::NotAlive(user_id));
        }
        Ok(player)
    }

    fn require_phase(&self, phase: Phase) -> Result<(), GameError> {
        if self.phase != phase {
            return Err(GameError::InvalidPhase(self.phase));
        }
        Ok(())
    }

    fn transition(&mut self, next: Phase) -> Result<(), GameError> {
        if !self.phase.can_transition_to(next) {
            return Err(GameError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!(game_id = %self.id, from = ?self.phase, to = ?next, day = self.day, "phase transition");
        self.phase = next;
        Ok(())
    }

    fn phase_changed(&self) -> Outcome {
        (
            Audience::Everyone,
            ServerMessage::PhaseChanged {
                phase: self.phase,
                day: self.day,
                duration_ms: self.phase_duration().as_millis() as u64,
            },
        )
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// LOBBY → NIGHT, day 1. Tells everyone the game began and each player
    /// their role; werewolves also learn their pack.
    pub fn start(&mut self) -> Result<Vec<Outcome>, GameError> {
        self.transition(Phase::Night)?;
        self.status = GameStatus::Active;
        self.day = 1;

        let wolves: Vec<UserId> = self
            .players
            .iter()
            .filter(|p| p.role == Role::Werewolf)
            .map(|p| p.user_id)
            .collect();

        let mut out = vec![(
            Audience::Everyone,
            ServerMessage::GameStarted {
                game_id: self.id,
                room_id: self.room_id,
                player_ids: self.user_ids(),
                phase: self.phase,
                day: self.day,
            },
        )];
        for p in &self.players {
            let teammates = if p.role == Role::Werewolf {
                wolves.iter().copied().filter(|w| *w != p.user_id).collect()
            } else {
                Vec::new()
            };
            out.push((
                Audience::Player(p.user_id),
                ServerMessage::RoleAssigned {
                    role: p.role,
                    faction: p.role.faction(),
                    teammates,
                },
            ));
        }
        out.push(self.phase_changed());
        info!(game_id = %self.id, room_id = %self.room_id, players = self.players.len(), "game started");
        Ok(out)
    }

    /// Sets the voter's single active target, replacing any previous one.
    pub fn cast_vote(&mut self, voter: UserId, target: UserId) -> Result<Vec<Outcome>, GameError> {
        self.require_phase(Phase::Voting)?;
        let previous = self.require_alive(voter)?.vote;
        if voter == target {
            return Err(GameError::InvalidTarget("cannot vote for yourself".into()));
        }
        let target_alive = self
            .player(target)
            .ok_or_else(|| GameError::InvalidTarget(format!("{target} is not in this game")))?
            .alive;
        if !target_alive {
            return Err(GameError::InvalidTarget(format!("{target} is dead")));
        }
        if previous == Some(target) {
            return Err(GameError::DuplicateVote(target));
        }
        if let Some(p) = self.player_mut(voter) {
            p.vote = Some(target);
        }
        Ok(vec![(
            Audience::Everyone,
            ServerMessage::VoteCast {
                voter_id: voter,
                target_id: target,
                previous_target_id: previous,
            },
        )])
    }

    pub fn remove_vote(&mut self, voter: UserId) -> Result<Vec<Outcome>, GameError> {
        self.require_phase(Phase::Voting)?;
        self.require_alive(voter)?;
        let target = self
            .player_mut(voter)
            .and_then(|p| p.vote.take())
            .ok_or(GameError::NoActiveVote)?;
        Ok(vec![(
            Audience::Everyone,
            ServerMessage::VoteRemoved {
                voter_id: voter,
                target_id: target,
            },
        )])
    }

    /// Records a night action. Resubmitting replaces the slot.
    pub fn submit_night_action(
        &mut self,
        actor: UserId,
        kind: NightActionKind,
        target: UserId,
    ) -> Result<(), GameError> {
        self.require_phase(Phase::Night)?;
        let role = self.require_alive(actor)?.role;
        if role.night_action() != Some(kind) {
            return Err(GameError::RoleCannotAct);
        }
        let target_player = self
            .player(target)
            .ok_or_else(|| GameError::InvalidTarget(format!("{target} is not in this game")))?;
        if !target_player.alive {
            return Err(GameError::InvalidTarget(format!("{target} is dead")));
        }
        match kind {
            NightActionKind::Kill if target_player.role == Role::Werewolf => {
                return Err(GameError::InvalidTarget(
                    "werewolves cannot target a werewolf".into(),
                ));
            }
            NightActionKind::Investigate if target == actor => {
                return Err(GameError::InvalidTarget("cannot investigate yourself".into()));
            }
            NightActionKind::Protect if self.last_protected == Some(target) => {
                return Err(GameError::InvalidTarget(
                    "cannot protect the same player two nights in a row".into(),
                ));
            }
            _ => {}
        }
        self.night_actions.insert(
            kind,
            NightAction {
                actor,
                kind,
                target,
                night: self.day,
            },
        );
        debug!(game_id = %self.id, %actor, ?kind, %target, "night action recorded");
        Ok(())
    }

    /// Closes the current phase (timer expiry or force-advance).
    pub fn advance(&mut self) -> Result<Vec<Outcome>, GameError> {
        match self.phase {
            Phase::Night => self.close_night(),
            Phase::Day => {
                self.transition(Phase::Voting)?;
                self.clear_votes();
                Ok(vec![self.phase_changed()])
            }
            Phase::Voting => self.close_voting(),
            Phase::Lobby | Phase::Ended => Err(GameError::InvalidPhase(self.phase)),
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Protect applies before kill; investigation always yields a result.
    fn close_night(&mut self) -> Result<Vec<Outcome>, GameError> {
        let actions = std::mem::take(&mut self.night_actions);
        let protected = actions.get(&NightActionKind::Protect).map(|a| a.target);
        self.last_protected = protected;

        let mut deaths = Vec::new();
        if let Some(kill) = actions.get(&NightActionKind::Kill) {
            if Some(kill.target) == protected {
                debug!(game_id = %self.id, target = %kill.target, "kill blocked by protection");
            } else if let Some(victim) = self.player_mut(kill.target).filter(|p| p.alive) {
                victim.alive = false;
                victim.vote = None;
                deaths.push(Death {
                    player_id: victim.user_id,
                    role: victim.role,
                    cause: DeathCause::Killed,
                });
            }
        }

        let mut out = vec![(
            Audience::Everyone,
            ServerMessage::DayResults {
                day: self.day,
                deaths,
            },
        )];
        if let Some(inv) = actions.get(&NightActionKind::Investigate) {
            if let Some(target) = self.player(inv.target) {
                out.push((
                    Audience::Player(inv.actor),
                    ServerMessage::InvestigationResult {
                        target_id: target.user_id,
                        faction: target.role.faction(),
                    },
                ));
            }
        }

        match self.check_win(None) {
            Some((faction, reason)) => out.push(self.finish(faction, reason)?),
            None => {
                self.transition(Phase::Day)?;
                out.push(self.phase_changed());
            }
        }
        Ok(out)
    }

    /// Votes per target, most votes first.
    pub fn tally(&self) -> Vec<TallyEntry> {
        let mut counts: HashMap<UserId, u32> = HashMap::new();
        for p in self.players.iter().filter(|p| p.alive) {
            if let Some(target) = p.vote {
                *counts.entry(target).or_default() += 1;
            }
        }
        let mut tally: Vec<TallyEntry> = counts
            .into_iter()
            .map(|(target_id, votes)| TallyEntry { target_id, votes })
            .collect();
        tally.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.target_id.cmp(&b.target_id)));
        tally
    }

    /// Plurality executes; a tie for the most votes executes nobody.
    fn close_voting(&mut self) -> Result<Vec<Outcome>, GameError> {
        let tally = self.tally();
        let top = tally.first().map(|e| e.votes).unwrap_or(0);
        let tie = tally.iter().filter(|e| e.votes == top).count() > 1;

        let mut executed = None;
        if !tie {
            if let Some(leader) = tally.first() {
                if let Some(victim) = self.player_mut(leader.target_id) {
                    victim.alive = false;
                    executed = Some(Execution {
                        player_id: victim.user_id,
                        role: victim.role,
                        votes: leader.votes,
                    });
                }
            }
        }
        self.clear_votes();

        let deaths = executed
            .iter()
            .map(|e| Death {
                player_id: e.player_id,
                role: e.role,
                cause: DeathCause::Executed,
            })
            .collect();
        let mut out = vec![
            (
                Audience::Everyone,
                ServerMessage::VotingResults {
                    day: self.day,
                    executed: executed.clone(),
                    tally,
                    tie,
                },
            ),
            (
                Audience::Everyone,
                ServerMessage::DayResults {
                    day: self.day,
                    deaths,
                },
            ),
        ];

        match self.check_win(executed.as_ref()) {
            Some((faction, reason)) => out.push(self.finish(faction, reason)?),
            None => {
                self.transition(Phase::Night)?;
                self.day += 1;
                out.push(self.phase_changed());
            }
        }
        Ok(out)
    }

    fn clear_votes(&mut self) {
        for p in &mut self.players {
            p.vote = None;
        }
    }

    /// Evaluates the win predicates in priority order.
    fn check_win(&self, executed: Option<&Execution>) -> Option<(Faction, WinReason)> {
        if executed.is_some_and(|e| e.role == Role::Jester) {
            return Some((Faction::Solo, WinReason::JesterExecuted));
        }
        let alive = self.players.iter().filter(|p| p.alive);
        let (wolves, others) = alive.fold((0usize, 0usize), |(w, o), p| {
            if p.role == Role::Werewolf {
                (w + 1, o)
            } else {
                (w, o + 1)
            }
        });
        if wolves == 0 {
            return Some((Faction::Village, WinReason::WerewolvesEliminated));
        }
        if wolves >= others {
            return Some((Faction::Werewolf, WinReason::WerewolvesParity));
        }
        None
    }

    fn finish(&mut self, faction: Faction, reason: WinReason) -> Result<Outcome, GameError> {
        self.transition(Phase::Ended)?;
        self.status = GameStatus::Ended;
        self.winner = Some((faction, reason));
        info!(game_id = %self.id, room_id = %self.room_id, ?faction, ?reason, day = self.day, "game ended");
        Ok((
            Audience::Everyone,
            ServerMessage::GameEnded {
                game_id: self.id,
                winning_faction: faction,
                reason,
                roles: self
                    .players
                    .iter()
                    .map(|p| RoleReveal {
                        user_id: p.user_id,
                        role: p.role,
                    })
                    .collect(),
            },
        ))
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// The game as `viewer` may see it. `None` is the public view.
    pub fn snapshot(&self, viewer: Option<UserId>) -> GameSnapshot {
        let me = viewer.and_then(|v| self.player(v));
        let wolf_viewer = me.is_some_and(|p| p.role == Role::Werewolf);
        let ended = self.is_finished();

        let players = self
            .players
            .iter()
            .map(|p| {
                let visible = ended
                    || !p.alive
                    || Some(p.user_id) == viewer
                    || (wolf_viewer && p.role == Role::Werewolf);
                PlayerView {
                    user_id: p.user_id,
                    username: p.username.clone(),
                    alive: p.alive,
                    connected: p.connected,
                    role: visible.then_some(p.role),
                    vote_target: if self.phase == Phase::Voting { p.vote } else { None },
                }
            })
            .collect();

        GameSnapshot {
            game_id: self.id,
            room_id: self.room_id,
            status: self.status,
            phase: self.phase,
            day: self.day,
            players,
            your_role: me.map(|p| p.role),
            winning_faction: self.winner.map(|(f, _)| f),
            phase_remaining_ms: None,
        }
    }

    /// Where a chat line from `sender` may go right now.
    ///
    /// Outside an active game everyone talks to the room. During the game
    /// the dead and spectators share a channel, and at night only the
    /// werewolves may speak, to each other.
    pub fn chat_audience(&self, sender: UserId) -> Result<(ChatChannel, Audience), GameError> {
        if self.status != GameStatus::Active {
            return Ok((ChatChannel::Room, Audience::Everyone));
        }
        match self.player(sender) {
            None => Ok((ChatChannel::Dead, Audience::Dead)),
            Some(p) if !p.alive => Ok((ChatChannel::Dead, Audience::Dead)),
            Some(p) if self.phase == Phase::Night => {
                if p.role != Role::Werewolf {
                    return Err(GameError::InvalidPhase(Phase::Night));
                }
                let pack = self
                    .players
                    .iter()
                    .filter(|w| w.role == Role::Werewolf && w.alive)
                    .map(|w| w.user_id)
                    .collect();
                Ok((ChatChannel::Werewolf, Audience::Players(pack)))
            }
            Some(_) => Ok((ChatChannel::Room, Audience::Everyone)),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the engine.
    //!
    //! Games are built with fixed roles via `with_roles` so outcomes are
    //! deterministic. Naming: `test_{operation}_{scenario}_{expected}`.

    use super::*;

    // -- Helpers ----------------------------------------------------------

    fn uid(id: u64) -> UserId {
        UserId(id)
    }

    /// Six players: 1,2 werewolves; 3 seer; 4 doctor; 5,6 villagers.
    fn six_player_game() -> Game {
        let roles = [
            Role::Werewolf,
            Role::Werewolf,
            Role::Seer,
            Role::Doctor,
            Role::Villager,
            Role::Villager,
        ];
        let assignment = roles
            .into_iter()
            .enumerate()
            .map(|(i, role)| {
                let id = i as u64 + 1;
                (
                    Seat {
                        user_id: uid(id),
                        username: format!("p{id}"),
                    },
                    role,
                )
            })
            .collect();
        Game::with_roles(GameId(1), RoomId(1), assignment, PhaseTimings::default()).unwrap()
    }

    fn started() -> Game {
        let mut g = six_player_game();
        g.start().unwrap();
        g
    }

    /// Advances a started game from NIGHT (no actions) to VOTING.
    fn to_voting(g: &mut Game) {
        g.advance().unwrap();
        g.advance().unwrap();
        assert_eq!(g.phase(), Phase::Voting);
    }

    fn has<F: Fn(&ServerMessage) -> bool>(out: &[Outcome], pred: F) -> bool {
        out.iter().any(|(_, m)| pred(m))
    }

    // =====================================================================
    // with_roles() / start()
    // =====================================================================

    #[test]
    fn test_with_roles_rejects_counts_off_table() {
        let assignment = (1..=5)
            .map(|i| {
                (
                    Seat {
                        user_id: uid(i),
                        username: String::new(),
                    },
                    Role::Villager,
                )
            })
            .collect();
        let err = Game::with_roles(GameId(1), RoomId(1), assignment, PhaseTimings::default())
            .unwrap_err();
        assert_eq!(err, GameError::BadDistribution(5));
    }

    #[test]
    fn test_start_moves_lobby_to_night_day_one() {
        let mut g = six_player_game();
        assert_eq!(g.phase(), Phase::Lobby);
        assert_eq!(g.status(), GameStatus::Lobby);

        let out = g.start().unwrap();
        assert_eq!(g.phase(), Phase::Night);
        assert_eq!(g.day(), 1);
        assert_eq!(g.status(), GameStatus::Active);
        assert!(has(&out, |m| matches!(m, ServerMessage::GameStarted { .. })));
        assert!(has(&out, |m| matches!(
            m,
            ServerMessage::PhaseChanged { phase: Phase::Night, day: 1, .. }
        )));
    }

    #[test]
    fn test_start_tells_werewolves_their_pack() {
        let mut g = six_player_game();
        let out = g.start().unwrap();
        let wolf_msg = out
            .iter()
            .find(|(aud, _)| *aud == Audience::Player(uid(1)))
            .map(|(_, m)| m.clone())
            .unwrap();
        assert_eq!(
            wolf_msg,
            ServerMessage::RoleAssigned {
                role: Role::Werewolf,
                faction: Faction::Werewolf,
                teammates: vec![uid(2)],
            }
        );
    }

    #[test]
    fn test_start_twice_is_illegal() {
        let mut g = started();
        assert!(matches!(g.start(), Err(GameError::InvalidTransition { .. })));
    }

    // =====================================================================
    // Phase sequence
    // =====================================================================

    #[test]
    fn test_advance_follows_fixed_sequence() {
        let mut g = started();
        g.advance().unwrap();
        assert_eq!(g.phase(), Phase::Day);
        g.advance().unwrap();
        assert_eq!(g.phase(), Phase::Voting);
        g.advance().unwrap();
        assert_eq!(g.phase(), Phase::Night);
        assert_eq!(g.day(), 2);
    }

    #[test]
    fn test_advance_in_lobby_is_invalid_phase() {
        let mut g = six_player_game();
        assert_eq!(g.advance(), Err(GameError::InvalidPhase(Phase::Lobby)));
    }

    // =====================================================================
    // Voting
    // =====================================================================

    #[test]
    fn test_cast_vote_outside_voting_rejected() {
        let mut g = started();
        assert_eq!(g.cast_vote(uid(3), uid(1)), Err(GameError::InvalidPhase(Phase::Night)));
    }

    #[test]
    fn test_cast_vote_last_write_wins() {
        let mut g = started();
        to_voting(&mut g);

        g.cast_vote(uid(3), uid(1)).unwrap();
        let out = g.cast_vote(uid(3), uid(2)).unwrap();
        assert_eq!(
            out[0].1,
            ServerMessage::VoteCast {
                voter_id: uid(3),
                target_id: uid(2),
                previous_target_id: Some(uid(1)),
            }
        );
        assert_eq!(g.player(uid(3)).unwrap().vote, Some(uid(2)));
        assert_eq!(g.tally(), vec![TallyEntry { target_id: uid(2), votes: 1 }]);
    }

    #[test]
    fn test_cast_vote_same_target_is_duplicate() {
        let mut g = started();
        to_voting(&mut g);
        g.cast_vote(uid(3), uid(1)).unwrap();
        assert_eq!(g.cast_vote(uid(3), uid(1)), Err(GameError::DuplicateVote(uid(1))));
    }

    #[test]
    fn test_cast_vote_self_and_outsider_rejected() {
        let mut g = started();
        to_voting(&mut g);
        assert!(matches!(g.cast_vote(uid(3), uid(3)), Err(GameError::InvalidTarget(_))));
        assert!(matches!(g.cast_vote(uid(3), uid(99)), Err(GameError::InvalidTarget(_))));
        assert_eq!(g.cast_vote(uid(99), uid(3)), Err(GameError::NotAPlayer(uid(99))));
    }

    #[test]
    fn test_remove_vote_without_vote_rejected() {
        let mut g = started();
        to_voting(&mut g);
        assert_eq!(g.remove_vote(uid(3)), Err(GameError::NoActiveVote));
        g.cast_vote(uid(3), uid(1)).unwrap();
        let out = g.remove_vote(uid(3)).unwrap();
        assert!(has(&out, |m| matches!(m, ServerMessage::VoteRemoved { .. })));
        assert!(g.tally().is_empty());
    }

    #[test]
    fn test_close_voting_plurality_executes() {
        let mut g = started();
        to_voting(&mut g);
        for voter in [3, 4, 5, 6] {
            g.cast_vote(uid(voter), uid(1)).unwrap();
        }
        g.cast_vote(uid(1), uid(3)).unwrap();

        let out = g.advance().unwrap();
        let results = out
            .iter()
            .find_map(|(_, m)| match m {
                ServerMessage::VotingResults { executed, tie, .. } => Some((executed.clone(), *tie)),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            results,
            (
                Some(Execution {
                    player_id: uid(1),
                    role: Role::Werewolf,
                    votes: 4,
                }),
                false
            )
        );
        assert!(!g.player(uid(1)).unwrap().alive);
        assert!(has(&out, |m| matches!(m, ServerMessage::DayResults { deaths, .. } if deaths.len() == 1)));
        // One werewolf left against four others: game goes on.
        assert_eq!(g.phase(), Phase::Night);
    }

    #[test]
    fn test_close_voting_tie_executes_nobody() {
        let mut g = started();
        to_voting(&mut g);
        g.cast_vote(uid(3), uid(1)).unwrap();
        g.cast_vote(uid(4), uid(2)).unwrap();

        let out = g.advance().unwrap();
        assert!(has(&out, |m| matches!(
            m,
            ServerMessage::VotingResults { executed: None, tie: true, .. }
        )));
        assert!(g.players().iter().all(|p| p.alive));
    }

    #[test]
    fn test_close_voting_no_votes_executes_nobody() {
        let mut g = started();
        to_voting(&mut g);
        let out = g.advance().unwrap();
        assert!(has(&out, |m| matches!(
            m,
            ServerMessage::VotingResults { executed: None, tie: false, .. }
        )));
    }

    // =====================================================================
    // Night actions
    // =====================================================================

    #[test]
    fn test_night_kill_resolves_into_day_results() {
        let mut g = started();
        g.submit_night_action(uid(1), NightActionKind::Kill, uid(5)).unwrap();

        let out = g.advance().unwrap();
        assert!(has(&out, |m| matches!(
            m,
            ServerMessage::DayResults { deaths, .. }
                if deaths == &vec![Death { player_id: uid(5), role: Role::Villager, cause: DeathCause::Killed }]
        )));
        assert!(!g.player(uid(5)).unwrap().alive);
        assert_eq!(g.phase(), Phase::Day);
    }

    #[test]
    fn test_night_protect_blocks_kill() {
        let mut g = started();
        g.submit_night_action(uid(1), NightActionKind::Kill, uid(5)).unwrap();
        g.submit_night_action(uid(4), NightActionKind::Protect, uid(5)).unwrap();

        let out = g.advance().unwrap();
        assert!(has(&out, |m| matches!(m, ServerMessage::DayResults { deaths, .. } if deaths.is_empty())));
        assert!(g.player(uid(5)).unwrap().alive);
    }

    #[test]
    fn test_night_kill_slot_is_shared_last_write_wins() {
        let mut g = started();
        g.submit_night_action(uid(1), NightActionKind::Kill, uid(5)).unwrap();
        g.submit_night_action(uid(2), NightActionKind::Kill, uid(6)).unwrap();
        assert_eq!(g.night_action(NightActionKind::Kill).unwrap().target, uid(6));
    }

    #[test]
    fn test_investigation_succeeds_even_if_seer_dies() {
        let mut g = started();
        g.submit_night_action(uid(3), NightActionKind::Investigate, uid(2)).unwrap();
        g.submit_night_action(uid(1), NightActionKind::Kill, uid(3)).unwrap();

        let out = g.advance().unwrap();
        assert!(out.iter().any(|(aud, m)| *aud == Audience::Player(uid(3))
            && *m
                == ServerMessage::InvestigationResult {
                    target_id: uid(2),
                    faction: Faction::Werewolf,
                }));
        assert!(!g.player(uid(3)).unwrap().alive);
    }

    #[test]
    fn test_night_action_rules() {
        let mut g = started();
        assert_eq!(
            g.submit_night_action(uid(5), NightActionKind::Kill, uid(3)),
            Err(GameError::RoleCannotAct)
        );
        assert!(matches!(
            g.submit_night_action(uid(1), NightActionKind::Kill, uid(2)),
            Err(GameError::InvalidTarget(_))
        ));
        assert!(matches!(
            g.submit_night_action(uid(3), NightActionKind::Investigate, uid(3)),
            Err(GameError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_doctor_cannot_protect_same_player_twice_in_a_row() {
        let mut g = started();
        g.submit_night_action(uid(4), NightActionKind::Protect, uid(5)).unwrap();
        g.advance().unwrap(); // night -> day
        g.advance().unwrap(); // day -> voting
        g.advance().unwrap(); // voting -> night 2
        assert!(matches!(
            g.submit_night_action(uid(4), NightActionKind::Protect, uid(5)),
            Err(GameError::InvalidTarget(_))
        ));
        g.submit_night_action(uid(4), NightActionKind::Protect, uid(6)).unwrap();
    }

    #[test]
    fn test_dead_player_cannot_act_or_vote() {
        let mut g = started();
        g.submit_night_action(uid(1), NightActionKind::Kill, uid(4)).unwrap();
        g.advance().unwrap();
        g.advance().unwrap();
        assert_eq!(g.cast_vote(uid(4), uid(1)), Err(GameError::NotAlive(uid(4))));
    }

    // =====================================================================
    // Win conditions
    // =====================================================================

    #[test]
    fn test_parity_after_night_ends_game() {
        // 5 players: 1 wolf. Kill down to parity over two nights.
        let assignment = [Role::Werewolf, Role::Seer, Role::Doctor, Role::Villager, Role::Villager]
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                (
                    Seat {
                        user_id: uid(i as u64 + 1),
                        username: String::new(),
                    },
                    r,
                )
            })
            .collect();
        let mut g = Game::with_roles(GameId(2), RoomId(1), assignment, PhaseTimings::default()).unwrap();
        g.start().unwrap();

        g.submit_night_action(uid(1), NightActionKind::Kill, uid(2)).unwrap();
        g.advance().unwrap(); // 4 alive: wolf vs 3
        g.advance().unwrap();
        for v in [1, 3, 4] {
            g.cast_vote(uid(v), uid(5)).unwrap();
        }
        g.advance().unwrap(); // villager 5 executed: wolf vs 2
        assert_eq!(g.phase(), Phase::Night);

        g.submit_night_action(uid(1), NightActionKind::Kill, uid(3)).unwrap();
        let out = g.advance().unwrap();
        assert_eq!(g.phase(), Phase::Ended);
        assert_eq!(g.winner(), Some((Faction::Werewolf, WinReason::WerewolvesParity)));
        assert!(has(&out, |m| matches!(m, ServerMessage::GameEnded { .. })));
    }

    #[test]
    fn test_executing_last_wolf_wins_for_village() {
        let mut g = started();
        g.submit_night_action(uid(4), NightActionKind::Protect, uid(5)).unwrap();
        g.advance().unwrap();
        g.advance().unwrap();
        for v in [3, 4, 5, 6] {
            g.cast_vote(uid(v), uid(1)).unwrap();
        }
        g.advance().unwrap();
        g.advance().unwrap(); // night 2, nothing
        g.advance().unwrap();
        for v in [3, 4, 5, 6] {
            g.cast_vote(uid(v), uid(2)).unwrap();
        }
        g.advance().unwrap();
        assert_eq!(g.winner(), Some((Faction::Village, WinReason::WerewolvesEliminated)));
        assert_eq!(g.status(), GameStatus::Ended);
    }

    #[test]
    fn test_executing_jester_wins_for_solo() {
        let roles = [
            Role::Werewolf,
            Role::Werewolf,
            Role::Seer,
            Role::Doctor,
            Role::Jester,
            Role::Villager,
            Role::Villager,
        ];
        let assignment = roles
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                (
                    Seat {
                        user_id: uid(i as u64 + 1),
                        username: String::new(),
                    },
                    r,
                )
            })
            .collect();
        let mut g = Game::with_roles(GameId(3), RoomId(1), assignment, PhaseTimings::default()).unwrap();
        g.start().unwrap();
        g.advance().unwrap();
        g.advance().unwrap();
        for v in [1, 2, 3] {
            g.cast_vote(uid(v), uid(5)).unwrap();
        }
        g.advance().unwrap();
        assert_eq!(g.winner(), Some((Faction::Solo, WinReason::JesterExecuted)));
    }

    // =====================================================================
    // Views
    // =====================================================================

    #[test]
    fn test_snapshot_hides_roles_from_villagers() {
        let g = started();
        let snap = g.snapshot(Some(uid(5)));
        assert_eq!(snap.your_role, Some(Role::Villager));
        let visible: Vec<_> = snap.players.iter().filter(|p| p.role.is_some()).collect();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].user_id, uid(5));
    }

    #[test]
    fn test_snapshot_shows_pack_to_werewolf() {
        let g = started();
        let snap = g.snapshot(Some(uid(1)));
        let visible: Vec<_> = snap
            .players
            .iter()
            .filter(|p| p.role.is_some())
            .map(|p| p.user_id)
            .collect();
        assert_eq!(visible, vec![uid(1), uid(2)]);
    }

    #[test]
    fn test_chat_audience_by_phase_and_state() {
        let mut g = started();
        assert!(matches!(
            g.chat_audience(uid(1)),
            Ok((ChatChannel::Werewolf, Audience::Players(_)))
        ));
        assert_eq!(g.chat_audience(uid(5)), Err(GameError::InvalidPhase(Phase::Night)));
        assert_eq!(g.chat_audience(uid(99)).unwrap().0, ChatChannel::Dead);

        g.advance().unwrap();
        assert_eq!(g.chat_audience(uid(5)).unwrap(), (ChatChannel::Room, Audience::Everyone));
    }
}
