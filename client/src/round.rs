//! Member-side view of the current round
//!
//! A [`LocalRound`] tracks what one participant needs to present a round:
//! its own liveness and score, which opponents are still flying, and the
//! member phase including SPECTATING. It never decides anything for the
//! room; authoritative signals (from the arbiter or from the room mirror)
//! are fed in and the resulting presentation events are returned.

use crate::events::ClientEvent;
use shared::{
    Generation, Medal, MedalThresholds, PlayerIndex, PlayerSnapshot, RoundPhase, SeededRng,
};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct LocalRound {
    player_index: PlayerIndex,
    generation: Generation,
    seed: f64,
    phase: RoundPhase,
    alive: bool,
    score: u32,
    opponents: BTreeSet<PlayerIndex>,
    opponents_alive: BTreeSet<PlayerIndex>,
    ready_sent: bool,
    medals: MedalThresholds,
}

impl LocalRound {
    pub fn new(
        player_index: PlayerIndex,
        member_count: usize,
        seed: f64,
        medals: MedalThresholds,
    ) -> Self {
        let opponents: BTreeSet<PlayerIndex> = (0..member_count as PlayerIndex)
            .filter(|&i| i != player_index)
            .collect();
        Self {
            player_index,
            generation: 0,
            seed,
            phase: RoundPhase::Countdown,
            alive: true,
            score: 0,
            opponents_alive: opponents.clone(),
            opponents,
            ready_sent: false,
            medals,
        }
    }

    pub fn player_index(&self) -> PlayerIndex {
        self.player_index
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn seed(&self) -> f64 {
        self.seed
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn opponents_alive(&self) -> usize {
        self.opponents_alive.len()
    }

    /// Course generator every member derives from the shared seed.
    pub fn rng(&self) -> SeededRng {
        SeededRng::new(self.seed)
    }

    pub fn medal(&self) -> Medal {
        self.medals.medal_for(self.score)
    }

    /// Whether a countdown value for `generation` should be shown.
    pub fn accepts_countdown(&self, generation: Generation) -> bool {
        generation == self.generation && self.phase == RoundPhase::Countdown
    }

    /// COUNTDOWN -> PLAYING. Returns false for stale or duplicate starts.
    pub fn start(&mut self, generation: Generation) -> bool {
        if !self.accepts_countdown(generation) {
            return false;
        }
        self.phase = RoundPhase::Playing;
        true
    }

    pub fn set_score(&mut self, score: u32) {
        if self.phase == RoundPhase::Playing && self.alive {
            self.score = score;
        }
    }

    /// Own state report, only while flying.
    pub fn snapshot(&self, y: f32, velocity: f32) -> Option<PlayerSnapshot> {
        if self.phase != RoundPhase::Playing || !self.alive {
            return None;
        }
        Some(PlayerSnapshot {
            player_index: self.player_index,
            y,
            velocity,
            alive: true,
            score: self.score,
        })
    }

    fn finish(&mut self) -> ClientEvent {
        self.phase = RoundPhase::GameOver;
        ClientEvent::RoundOver(self.medal())
    }

    /// Own death. `None` if we were not flying, which also makes the
    /// death unreportable.
    pub fn own_death(&mut self) -> Option<ClientEvent> {
        if self.phase != RoundPhase::Playing || !self.alive {
            return None;
        }
        self.alive = false;
        if self.opponents_alive.is_empty() {
            Some(self.finish())
        } else {
            self.phase = RoundPhase::Spectating;
            Some(ClientEvent::Spectating)
        }
    }

    /// An opponent crashed; may end spectating.
    pub fn opponent_died(&mut self, index: PlayerIndex) -> Option<ClientEvent> {
        if !self.opponents_alive.remove(&index) {
            return None;
        }
        if self.phase == RoundPhase::Spectating && self.opponents_alive.is_empty() {
            return Some(self.finish());
        }
        None
    }

    pub fn opponent_left(&mut self, index: PlayerIndex) -> Option<ClientEvent> {
        self.opponents.remove(&index);
        self.opponent_died(index)
    }

    /// Authoritative end of round. Emits the medal once.
    pub fn round_over(&mut self, generation: Generation) -> Option<ClientEvent> {
        if generation != self.generation {
            return None;
        }
        match self.phase {
            RoundPhase::Playing | RoundPhase::Spectating => {
                self.alive = false;
                self.opponents_alive.clear();
                Some(self.finish())
            }
            _ => None,
        }
    }

    /// Returns the generation to stamp on a ready signal, once per round.
    pub fn request_ready(&mut self) -> Option<Generation> {
        if self.phase != RoundPhase::GameOver || self.ready_sent {
            return None;
        }
        self.ready_sent = true;
        Some(self.generation)
    }

    /// Enters the next round announced as a restart of `generation`.
    pub fn restart(&mut self, seed: f64, generation: Generation) -> Option<Generation> {
        if generation != self.generation {
            return None;
        }
        self.generation += 1;
        self.seed = seed;
        self.phase = RoundPhase::Countdown;
        self.alive = true;
        self.score = 0;
        self.ready_sent = false;
        self.opponents_alive = self.opponents.clone();
        Some(self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn playing(index: PlayerIndex, members: usize) -> LocalRound {
        let mut round = LocalRound::new(index, members, 0.5, MedalThresholds::default());
        assert!(round.start(0));
        round
    }

    #[test]
    fn test_start_once() {
        let mut round = LocalRound::new(1, 2, 0.5, MedalThresholds::default());
        assert!(!round.start(3));
        assert!(round.start(0));
        assert!(!round.start(0));
        assert_eq!(round.phase(), RoundPhase::Playing);
    }

    #[test]
    fn test_death_with_live_opponents_spectates() {
        let mut round = playing(0, 3);
        assert_eq!(round.own_death(), Some(ClientEvent::Spectating));
        assert_eq!(round.own_death(), None);

        assert_eq!(round.opponent_died(1), None);
        round.set_score(99);
        assert_eq!(round.score(), 0);
        assert_eq!(
            round.opponent_died(2),
            Some(ClientEvent::RoundOver(Medal::None))
        );
        assert_eq!(round.phase(), RoundPhase::GameOver);
    }

    #[test]
    fn test_last_to_die_goes_straight_to_game_over() {
        let mut round = playing(1, 2);
        round.opponent_died(0);
        round.set_score(23);
        assert_eq!(round.own_death(), Some(ClientEvent::RoundOver(Medal::Silver)));
        // authoritative signal afterwards is a no-op
        assert_eq!(round.round_over(0), None);
    }

    #[test]
    fn test_round_over_ignores_other_generations() {
        let mut round = playing(0, 2);
        round.own_death();
        assert_eq!(round.round_over(5), None);
        assert!(matches!(round.round_over(0), Some(ClientEvent::RoundOver(_))));
    }

    #[test]
    fn test_ready_once_per_round() {
        let mut round = playing(0, 2);
        assert_eq!(round.request_ready(), None);
        round.own_death();
        round.opponent_died(1);
        assert_eq!(round.request_ready(), Some(0));
        assert_eq!(round.request_ready(), None);
    }

    #[test]
    fn test_restart_resets_round() {
        let mut round = playing(0, 3);
        round.set_score(12);
        round.opponent_left(2);
        round.own_death();
        round.opponent_died(1);
        round.request_ready();

        assert_eq!(round.restart(0.75, 1), None);
        assert_eq!(round.restart(0.75, 0), Some(1));
        assert_eq!(round.restart(0.75, 0), None);
        assert_approx_eq!(round.seed(), 0.75, 1e-12);
        assert_eq!(round.phase(), RoundPhase::Countdown);
        assert!(round.is_alive());
        assert_eq!(round.score(), 0);
        assert_eq!(round.opponents_alive(), 1);
        assert!(round.accepts_countdown(1));
        assert!(!round.accepts_countdown(0));
    }

    #[test]
    fn test_snapshot_only_while_flying() {
        let mut round = LocalRound::new(2, 4, 0.1, MedalThresholds::default());
        assert!(round.snapshot(1.0, 0.0).is_none());
        round.start(0);
        round.set_score(7);
        let snapshot = round.snapshot(10.0, -2.0).unwrap();
        assert_eq!(snapshot.player_index, 2);
        assert_eq!(snapshot.score, 7);
        assert_approx_eq!(snapshot.y, 10.0, 1e-6);
        assert_approx_eq!(snapshot.velocity, -2.0, 1e-6);
        round.own_death();
        assert!(round.snapshot(10.0, -2.0).is_none());
    }
}
