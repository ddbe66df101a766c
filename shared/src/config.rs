use crate::medal::MedalThresholds;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for matchmaking, countdown and liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Room capacity; formation fires immediately when the pool reaches it.
    pub capacity: usize,
    /// Smallest pool that may form a room once the grace window elapses.
    pub min_players: usize,
    /// Armed when the pool first reaches `min_players`.
    pub grace_window: Duration,
    /// First countdown value; counts down to 1 before "GO!".
    pub countdown_from: u8,
    pub countdown_interval: Duration,
    /// Peer-to-peer only: base delay before the leader publishes a room.
    pub announce_delay: Duration,
    /// Peer-to-peer only: upper bound of the random extra announce delay.
    pub announce_jitter: Duration,
    /// Silence after which a connection is treated as disconnected.
    pub client_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub medals: MedalThresholds,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            min_players: 2,
            grace_window: Duration::from_secs(3),
            countdown_from: 3,
            countdown_interval: Duration::from_secs(1),
            announce_delay: Duration::from_millis(500),
            announce_jitter: Duration::from_millis(250),
            client_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            medals: MedalThresholds::default(),
        }
    }
}

impl MatchConfig {
    /// Short timings for tests and local simulations.
    pub fn fast() -> Self {
        Self {
            grace_window: Duration::from_millis(300),
            countdown_interval: Duration::from_millis(20),
            announce_delay: Duration::from_millis(30),
            announce_jitter: Duration::from_millis(20),
            client_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_millis(200),
            ..Self::default()
        }
    }
}
