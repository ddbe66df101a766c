//! Types, wire protocol and coordination state machines shared by the
//! matchmaking server and its clients.
//!
//! Everything in this crate is free of I/O: the server and the peer-to-peer
//! client feed events into the same [`WaitingPool`] and [`Room`] state
//! machines and act on the outcomes they return.

pub mod config;
pub mod countdown;
pub mod error;
pub mod medal;
pub mod pool;
pub mod protocol;
pub mod rng;
pub mod room;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use config::MatchConfig;
pub use countdown::{Countdown, CountdownStep, CountdownTick};
pub use error::CoordError;
pub use medal::{Medal, MedalThresholds};
pub use pool::{elect_leader, WaitingPool};
pub use protocol::{BrokerPacket, Packet, PeerMessage};
pub use rng::SeededRng;
pub use room::{DeathOutcome, DisconnectOutcome, Member, ReadyOutcome, Room, RoundPhase};

/// Position of a player inside a room, fixed at formation.
pub type PlayerIndex = u8;

/// Largest room whose members can all get a distinct [`PlayerIndex`].
pub const MAX_ROOM_SIZE: usize = PlayerIndex::MAX as usize + 1;

/// Round counter of a room, bumped on every restart.
pub type Generation = u32;

pub const DEFAULT_NAME: &str = "Guest";
pub const MAX_NAME_LEN: usize = 16;

pub const LOBBY_TOPIC: &str = "lobby";

/// Opaque per-session client identifier. Ordering is lexicographic and is
/// what peer-to-peer leader selection sorts on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn generate() -> Self {
        ClientId(format!("p_{}", random_token(10)))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        ClientId(id.to_string())
    }
}

/// Identifier of one formation event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn generate() -> Self {
        RoomId(format!("room_{}", random_token(8)))
    }

    /// Bus topic carrying this room's traffic in the peer-to-peer topology.
    pub fn topic(&self) -> String {
        format!("room/{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        RoomId(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
}

impl Client {
    pub fn new(id: ClientId, name: &str) -> Self {
        Self {
            id,
            name: sanitize_name(name),
        }
    }
}

/// Per-tick self report of a player, relayed verbatim to the other members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_index: PlayerIndex,
    pub y: f32,
    pub velocity: f32,
    pub alive: bool,
    pub score: u32,
}

/// Trims a display name, falls back to [`DEFAULT_NAME`] and caps the length.
pub fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return DEFAULT_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_LEN).collect()
}

/// Fresh shared seed in `[0, 1)`.
pub fn random_seed() -> f64 {
    rand::random::<f64>()
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Robin "), "Robin");
        assert_eq!(sanitize_name(""), DEFAULT_NAME);
        assert_eq!(sanitize_name("   "), DEFAULT_NAME);
        assert_eq!(
            sanitize_name("abcdefghijklmnopqrstuvwxyz").chars().count(),
            MAX_NAME_LEN
        );
    }

    #[test]
    fn test_generated_ids() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert!(a.0.starts_with("p_"));
        assert_eq!(a.0.len(), 12);
        assert_ne!(a, b);

        let room = RoomId::generate();
        assert!(room.0.starts_with("room_"));
        assert_eq!(room.topic(), format!("room/{}", room.0));
    }

    #[test]
    fn test_client_id_ordering_is_lexicographic() {
        let mut ids = vec![
            ClientId::from("p_zeta"),
            ClientId::from("p_alpha"),
            ClientId::from("p_mid"),
        ];
        ids.sort();
        assert_eq!(ids[0], ClientId::from("p_alpha"));
        assert_eq!(ids[2], ClientId::from("p_zeta"));
    }

    #[test]
    fn test_random_seed_range() {
        for _ in 0..1000 {
            let seed = random_seed();
            assert!((0.0..1.0).contains(&seed));
        }
    }
}
