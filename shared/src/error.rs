use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::room::RoundPhase;
use crate::{Generation, PlayerIndex};

/// Why a coordination event was rejected. Rejections are never fatal: the
/// caller drops the offending message and the room carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// The message was issued under a different round.
    StaleGeneration {
        expected: Generation,
        got: Generation,
    },
    /// The room is not in a phase that accepts this operation.
    WrongPhase {
        phase: RoundPhase,
        operation: &'static str,
    },
    /// No current member holds this index.
    UnknownPlayer(PlayerIndex),
    /// The player already died this round.
    AlreadyDead(PlayerIndex),
    /// The player already signalled ready this round.
    AlreadyReady(PlayerIndex),
    RoomNotFound(String),
    /// The client is not a member of any room.
    NotInRoom(String),
}

impl Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::StaleGeneration { expected, got } => {
                write!(f, "stale generation {got}, room is at {expected}")
            }
            CoordError::WrongPhase { phase, operation } => {
                write!(f, "{operation} not accepted while {phase:?}")
            }
            CoordError::UnknownPlayer(index) => write!(f, "no member with index {index}"),
            CoordError::AlreadyDead(index) => write!(f, "player {index} already died"),
            CoordError::AlreadyReady(index) => write!(f, "player {index} already ready"),
            CoordError::RoomNotFound(room) => write!(f, "room {room} not found"),
            CoordError::NotInRoom(client) => write!(f, "client {client} is not in a room"),
        }
    }
}

impl Error for CoordError {}
