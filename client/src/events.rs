//! What a session reports to the presentation layer, and what it accepts
//! from it.

use shared::{CountdownTick, Generation, Medal, PlayerIndex, PlayerSnapshot, RoomId};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Rejected(String),
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionStatus(ConnectionStatus),
    WaitingCountChanged(usize),
    MatchFound {
        room_id: RoomId,
        seed: f64,
        player_index: PlayerIndex,
        names: Vec<String>,
    },
    CountdownTick(CountdownTick),
    RoundStarted,
    OpponentStateChanged(PlayerSnapshot),
    OpponentDied(PlayerIndex),
    OpponentDisconnected(PlayerIndex),
    /// Own player died while others are still playing.
    Spectating,
    RoundOver(Medal),
    ReadyCountChanged {
        ready: usize,
        total: usize,
    },
    RoundRestarted {
        seed: f64,
        generation: Generation,
    },
}

/// Requests from the presentation layer into a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join { name: String },
    ReportState { y: f32, velocity: f32, score: u32 },
    ReportDied,
    ReadyRestart,
    Leave,
}
