//! Round state machine of a single room.
//!
//! A [`Room`] is mutated only through the event methods below, each of which
//! validates the generation and phase it was issued under before touching
//! state. The returned outcome tells the caller which signals to emit; the
//! room itself never performs I/O and never schedules timers.

use crate::error::CoordError;
use crate::{Client, ClientId, Generation, PlayerIndex, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    Countdown,
    Playing,
    /// Member-local: own player dead while others still play. A room as a
    /// whole never enters this phase.
    Spectating,
    GameOver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub client: Client,
    pub player_index: PlayerIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeathOutcome {
    pub alive_count: usize,
    /// The room just transitioned to GAMEOVER. True at most once per round.
    pub round_over: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyOutcome {
    pub ready: usize,
    pub total: usize,
    /// Every member is ready. True at most once per generation.
    pub restart_due: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub alive_count: usize,
    pub round_over: bool,
    /// No members remain; the room should be destroyed.
    pub emptied: bool,
    /// The remaining members were all ready already.
    pub restart_due: bool,
}

#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    seed: f64,
    members: Vec<Member>,
    alive: BTreeSet<PlayerIndex>,
    ready: BTreeSet<PlayerIndex>,
    generation: Generation,
    phase: RoundPhase,
    restart_signalled: bool,
}

impl Room {
    /// Forms a room from clients in their selected order; indices follow
    /// that order and never change afterwards. Clients past
    /// [`crate::MAX_ROOM_SIZE`] are left out.
    pub fn form(id: RoomId, seed: f64, clients: Vec<Client>) -> Self {
        let members: Vec<Member> = clients
            .into_iter()
            .zip(0..=PlayerIndex::MAX)
            .map(|(client, player_index)| Member {
                client,
                player_index,
            })
            .collect();
        let alive = members.iter().map(|m| m.player_index).collect();
        Self {
            id,
            seed,
            members,
            alive,
            ready: BTreeSet::new(),
            generation: 0,
            phase: RoundPhase::Countdown,
            restart_signalled: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn seed(&self) -> f64 {
        self.seed
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, index: PlayerIndex) -> Option<&Member> {
        self.members.iter().find(|m| m.player_index == index)
    }

    pub fn index_of(&self, id: &ClientId) -> Option<PlayerIndex> {
        self.members
            .iter()
            .find(|m| &m.client.id == id)
            .map(|m| m.player_index)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn is_alive(&self, index: PlayerIndex) -> bool {
        self.alive.contains(&index)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member that drives countdowns and restarts when no arbiter exists:
    /// the lowest remaining index.
    pub fn driver(&self) -> Option<PlayerIndex> {
        self.members.iter().map(|m| m.player_index).min()
    }

    fn check_generation(&self, generation: Generation) -> Result<(), CoordError> {
        if generation != self.generation {
            return Err(CoordError::StaleGeneration {
                expected: self.generation,
                got: generation,
            });
        }
        Ok(())
    }

    fn check_phase(&self, phase: RoundPhase, operation: &'static str) -> Result<(), CoordError> {
        if self.phase != phase {
            return Err(CoordError::WrongPhase {
                phase: self.phase,
                operation,
            });
        }
        Ok(())
    }

    fn check_member(&self, index: PlayerIndex) -> Result<(), CoordError> {
        if self.member(index).is_none() {
            return Err(CoordError::UnknownPlayer(index));
        }
        Ok(())
    }

    /// Whether a countdown step issued under `generation` may still be shown.
    pub fn check_countdown(&self, generation: Generation) -> Result<(), CoordError> {
        self.check_generation(generation)?;
        self.check_phase(RoundPhase::Countdown, "countdown")
    }

    /// COUNTDOWN -> PLAYING.
    pub fn begin_play(&mut self, generation: Generation) -> Result<(), CoordError> {
        self.check_countdown(generation)?;
        self.phase = RoundPhase::Playing;
        Ok(())
    }

    /// Applies a death at most once per player per round.
    pub fn apply_death(
        &mut self,
        index: PlayerIndex,
        generation: Generation,
    ) -> Result<DeathOutcome, CoordError> {
        self.check_generation(generation)?;
        self.check_phase(RoundPhase::Playing, "death")?;
        self.check_member(index)?;
        if !self.alive.remove(&index) {
            return Err(CoordError::AlreadyDead(index));
        }
        let round_over = self.alive.is_empty();
        if round_over {
            self.phase = RoundPhase::GameOver;
        }
        Ok(DeathOutcome {
            alive_count: self.alive.len(),
            round_over,
        })
    }

    pub fn mark_ready(
        &mut self,
        index: PlayerIndex,
        generation: Generation,
    ) -> Result<ReadyOutcome, CoordError> {
        self.check_generation(generation)?;
        self.check_phase(RoundPhase::GameOver, "ready")?;
        self.check_member(index)?;
        if !self.ready.insert(index) {
            return Err(CoordError::AlreadyReady(index));
        }
        Ok(ReadyOutcome {
            ready: self.ready.len(),
            total: self.members.len(),
            restart_due: self.take_restart_signal(),
        })
    }

    /// Removes a departed member. Counts as a death for liveness and
    /// reconciles the ready set against the members that remain.
    pub fn remove_member(&mut self, index: PlayerIndex) -> Result<DisconnectOutcome, CoordError> {
        let position = self
            .members
            .iter()
            .position(|m| m.player_index == index)
            .ok_or(CoordError::UnknownPlayer(index))?;
        self.members.remove(position);
        self.ready.remove(&index);
        let was_alive = self.alive.remove(&index);

        let round_over = was_alive && self.alive.is_empty() && self.phase == RoundPhase::Playing;
        if round_over {
            self.phase = RoundPhase::GameOver;
        }
        let emptied = self.members.is_empty();
        let restart_due =
            !emptied && self.phase == RoundPhase::GameOver && self.take_restart_signal();

        Ok(DisconnectOutcome {
            alive_count: self.alive.len(),
            round_over,
            emptied,
            restart_due,
        })
    }

    fn take_restart_signal(&mut self) -> bool {
        let all_ready = self
            .members
            .iter()
            .all(|m| self.ready.contains(&m.player_index));
        if all_ready && !self.restart_signalled {
            self.restart_signalled = true;
            true
        } else {
            false
        }
    }

    /// Starts the next round. Only the round that just ended may be
    /// restarted, so a replayed restart is rejected as stale.
    pub fn restart(&mut self, seed: f64, generation: Generation) -> Result<Generation, CoordError> {
        self.check_generation(generation)?;
        self.check_phase(RoundPhase::GameOver, "restart")?;
        self.seed = seed;
        self.generation += 1;
        self.ready.clear();
        self.alive = self.members.iter().map(|m| m.player_index).collect();
        self.phase = RoundPhase::Countdown;
        self.restart_signalled = false;
        Ok(self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_ROOM_SIZE;

    fn room_of(n: usize) -> Room {
        let clients = (0..n)
            .map(|i| Client::new(ClientId(format!("p_{i}")), &format!("Player {i}")))
            .collect();
        Room::form(RoomId::from("room_test"), 0.25, clients)
    }

    #[test]
    fn test_indices_stay_distinct_past_index_range() {
        let room = room_of(300);
        assert_eq!(room.member_count(), MAX_ROOM_SIZE);
        let indices: BTreeSet<PlayerIndex> =
            room.members().iter().map(|m| m.player_index).collect();
        assert_eq!(indices.len(), MAX_ROOM_SIZE);
        assert_eq!(room.members().last().map(|m| m.player_index), Some(PlayerIndex::MAX));
    }

    fn playing_room(n: usize) -> Room {
        let mut room = room_of(n);
        room.begin_play(0).unwrap();
        room
    }

    fn game_over_room(n: usize) -> Room {
        let mut room = playing_room(n);
        for i in 0..n {
            room.apply_death(i as PlayerIndex, 0).unwrap();
        }
        assert_eq!(room.phase(), RoundPhase::GameOver);
        room
    }

    #[test]
    fn test_formation_assigns_contiguous_indices() {
        let room = room_of(4);
        let indices: Vec<PlayerIndex> = room.members().iter().map(|m| m.player_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(room.alive_count(), 4);
        assert_eq!(room.generation(), 0);
        assert_eq!(room.phase(), RoundPhase::Countdown);
        assert_eq!(room.index_of(&ClientId::from("p_2")), Some(2));
        assert_eq!(room.driver(), Some(0));
    }

    #[test]
    fn test_begin_play_once() {
        let mut room = room_of(2);
        assert!(room.begin_play(1).is_err());
        room.begin_play(0).unwrap();
        assert_eq!(room.phase(), RoundPhase::Playing);
        assert!(matches!(
            room.begin_play(0),
            Err(CoordError::WrongPhase { .. })
        ));
        assert!(room.check_countdown(0).is_err());
    }

    #[test]
    fn test_duplicate_death_counts_once() {
        let mut room = playing_room(3);
        let first = room.apply_death(1, 0).unwrap();
        assert_eq!(first.alive_count, 2);
        assert!(!first.round_over);
        assert_eq!(room.apply_death(1, 0), Err(CoordError::AlreadyDead(1)));
        assert_eq!(room.alive_count(), 2);
    }

    #[test]
    fn test_death_before_play_is_rejected() {
        let mut room = room_of(2);
        assert!(matches!(
            room.apply_death(0, 0),
            Err(CoordError::WrongPhase { .. })
        ));
        assert_eq!(room.alive_count(), 2);
    }

    #[test]
    fn test_all_dead_fires_game_over_once() {
        let mut room = playing_room(4);
        let mut fired = 0;
        for i in 0..4 {
            if room.apply_death(i, 0).unwrap().round_over {
                fired += 1;
            }
        }
        for i in 0..4 {
            assert!(room.apply_death(i, 0).is_err());
        }
        assert_eq!(fired, 1);
        assert_eq!(room.alive_count(), 0);
        assert_eq!(room.phase(), RoundPhase::GameOver);
    }

    #[test]
    fn test_unknown_player() {
        let mut room = playing_room(2);
        assert_eq!(room.apply_death(7, 0), Err(CoordError::UnknownPlayer(7)));
        assert!(room.remove_member(7).is_err());
    }

    #[test]
    fn test_ready_only_after_game_over() {
        let mut room = playing_room(2);
        assert!(matches!(
            room.mark_ready(0, 0),
            Err(CoordError::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_restart_due_exactly_once() {
        let mut room = game_over_room(3);
        assert!(!room.mark_ready(0, 0).unwrap().restart_due);
        assert!(!room.mark_ready(1, 0).unwrap().restart_due);
        let last = room.mark_ready(2, 0).unwrap();
        assert!(last.restart_due);
        assert_eq!((last.ready, last.total), (3, 3));
        assert_eq!(room.mark_ready(2, 0), Err(CoordError::AlreadyReady(2)));
        assert_eq!(room.mark_ready(0, 0), Err(CoordError::AlreadyReady(0)));
    }

    #[test]
    fn test_stale_ready_is_ignored() {
        let mut room = game_over_room(2);
        assert_eq!(
            room.mark_ready(0, 5),
            Err(CoordError::StaleGeneration {
                expected: 0,
                got: 5
            })
        );
        assert_eq!(room.ready_count(), 0);
    }

    #[test]
    fn test_restart_bumps_generation_and_resets() {
        let mut room = game_over_room(2);
        room.mark_ready(0, 0).unwrap();
        room.mark_ready(1, 0).unwrap();

        let next = room.restart(0.75, 0).unwrap();
        assert_eq!(next, 1);
        assert_eq!(room.generation(), 1);
        assert_eq!(room.seed(), 0.75);
        assert_eq!(room.ready_count(), 0);
        assert_eq!(room.alive_count(), 2);
        assert_eq!(room.phase(), RoundPhase::Countdown);

        // A replayed restart for the old round does nothing.
        assert!(room.restart(0.1, 0).is_err());
        assert_eq!(room.generation(), 1);
        assert_eq!(room.seed(), 0.75);

        // Old-round ready messages arriving late are stale too.
        room.begin_play(1).unwrap();
        room.apply_death(0, 1).unwrap();
        room.apply_death(1, 1).unwrap();
        assert!(room.mark_ready(0, 0).is_err());
        assert!(!room.mark_ready(0, 1).unwrap().restart_due);
    }

    #[test]
    fn test_disconnect_counts_as_death() {
        let mut room = playing_room(3);
        room.apply_death(0, 0).unwrap();
        let outcome = room.remove_member(1).unwrap();
        assert_eq!(outcome.alive_count, 1);
        assert!(!outcome.round_over);
        assert!(!outcome.emptied);

        let outcome = room.remove_member(2).unwrap();
        assert!(outcome.round_over);
        assert_eq!(room.phase(), RoundPhase::GameOver);
        assert_eq!(room.member_count(), 1);
    }

    #[test]
    fn test_dead_player_disconnect_does_not_refire_game_over() {
        let mut room = game_over_room(2);
        let outcome = room.remove_member(0).unwrap();
        assert!(!outcome.round_over);
        assert_eq!(outcome.alive_count, 0);
    }

    #[test]
    fn test_disconnect_completes_ready_set() {
        let mut room = game_over_room(4);
        for i in 0..3 {
            assert!(!room.mark_ready(i, 0).unwrap().restart_due);
        }
        let outcome = room.remove_member(3).unwrap();
        assert!(outcome.restart_due);
        assert!(!outcome.emptied);

        // Only one restart per generation even if the ready set is touched again.
        assert!(room.mark_ready(0, 0).is_err());
        let outcome = room.remove_member(2).unwrap();
        assert!(!outcome.restart_due);
    }

    #[test]
    fn test_ready_member_leaving_is_not_counted() {
        let mut room = game_over_room(3);
        room.mark_ready(0, 0).unwrap();
        let outcome = room.remove_member(0).unwrap();
        assert!(!outcome.restart_due);
        assert_eq!(room.ready_count(), 0);
        let ready = room.mark_ready(1, 0).unwrap();
        assert_eq!((ready.ready, ready.total), (1, 2));
    }

    #[test]
    fn test_indices_survive_departures() {
        let mut room = room_of(4);
        room.remove_member(0).unwrap();
        room.remove_member(2).unwrap();
        let indices: Vec<PlayerIndex> = room.members().iter().map(|m| m.player_index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(room.driver(), Some(1));
        assert_eq!(room.alive_count(), 2);
    }

    #[test]
    fn test_last_member_leaving_empties_room() {
        let mut room = room_of(1);
        let outcome = room.remove_member(0).unwrap();
        assert!(outcome.emptied);
        assert!(!outcome.restart_due);
        assert!(room.is_empty());
        assert_eq!(room.driver(), None);
    }
}
