//! Wire messages. Every datagram and every bus payload is one of these
//! enums encoded with bincode.

use crate::countdown::CountdownTick;
use crate::{ClientId, Generation, PlayerIndex, PlayerSnapshot, RoomId};
use bincode::{deserialize, serialize};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Client <-> arbiter datagrams (centralized topology).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    JoinRequest {
        id: ClientId,
        name: String,
    },
    PlayerState {
        state: PlayerSnapshot,
    },
    PlayerDied {
        player_index: PlayerIndex,
        generation: Generation,
    },
    ReadyRestart {
        player_index: PlayerIndex,
        generation: Generation,
    },
    Heartbeat,
    Leave,

    // Server -> client
    WaitingForPlayers {
        count: usize,
    },
    MatchFound {
        room_id: RoomId,
        seed: f64,
        player_index: PlayerIndex,
        players: Vec<ClientId>,
        names: Vec<String>,
    },
    Countdown {
        generation: Generation,
        tick: CountdownTick,
    },
    StartGame {
        generation: Generation,
    },
    OpponentState {
        state: PlayerSnapshot,
    },
    OpponentDied {
        player_index: PlayerIndex,
    },
    OpponentDisconnected {
        player_index: PlayerIndex,
    },
    AllPlayersDied {
        generation: Generation,
    },
    ReadyUpdate {
        ready: usize,
        total: usize,
        generation: Generation,
    },
    RestartMatch {
        seed: f64,
        generation: Generation,
    },
    Rejected {
        reason: String,
    },
}

/// Payloads published on bus topics (peer-to-peer topology).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PeerMessage {
    // Lobby topic
    Hello {
        id: ClientId,
        name: String,
    },
    Presence {
        id: ClientId,
        name: String,
    },
    Gone {
        id: ClientId,
    },
    MatchFound {
        room_id: RoomId,
        seed: f64,
        members: Vec<ClientId>,
        names: Vec<String>,
    },

    // Room topic
    CountdownTick {
        generation: Generation,
        tick: CountdownTick,
    },
    StartGame {
        generation: Generation,
    },
    PlayerState {
        state: PlayerSnapshot,
    },
    PlayerDied {
        player_index: PlayerIndex,
        generation: Generation,
    },
    PlayerDisconnected {
        player_index: PlayerIndex,
    },
    ReadyRestart {
        player_index: PlayerIndex,
        generation: Generation,
    },
    RestartMatch {
        seed: f64,
        generation: Generation,
    },
}

/// Client <-> broker datagrams carrying opaque topic payloads.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum BrokerPacket {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: Vec<u8> },
    /// Published by the broker on the sender's behalf when it goes away.
    SetWill { topic: String, payload: Vec<u8> },
    Deliver { topic: String, payload: Vec<u8> },
    Heartbeat,
    Disconnect,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, bincode::Error> {
    serialize(message)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, bincode::Error> {
    deserialize(data)
}
