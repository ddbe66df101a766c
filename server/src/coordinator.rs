//! Arbiter-side match coordination
//!
//! The [`Coordinator`] owns the waiting pool and every live room. It is
//! driven by the server's single event loop, so handlers for the same room
//! never overlap and no locking is needed here. Timers (the pool's grace
//! window and one countdown ticker per room) are spawned tasks that report
//! back through the timer channel; their handles are kept next to the state
//! they belong to and aborted when that state goes away.

use crate::network::GameMessage;
use log::{debug, info, warn};
use shared::{
    pool::FormationTrigger, random_seed, Client, ClientId, Countdown, CountdownStep, CoordError,
    Generation, MatchConfig, Packet, PlayerIndex, PlayerSnapshot, Room, RoomId, WaitingPool,
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

/// Timer firings delivered back to the event loop
#[derive(Debug)]
pub enum TimerEvent {
    GraceExpired {
        epoch: u64,
    },
    CountdownStep {
        room_id: RoomId,
        generation: Generation,
        step: CountdownStep,
    },
}

struct GraceTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

struct RoomEntry {
    room: Room,
    ticker: Option<JoinHandle<()>>,
}

impl RoomEntry {
    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for RoomEntry {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}

pub struct Coordinator {
    config: MatchConfig,
    pool: WaitingPool,
    grace: Option<GraceTimer>,
    grace_epoch: u64,
    rooms: HashMap<RoomId, RoomEntry>,
    memberships: HashMap<ClientId, RoomId>,
    outbox: mpsc::UnboundedSender<GameMessage>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
}

impl Coordinator {
    pub fn new(
        config: MatchConfig,
        outbox: mpsc::UnboundedSender<GameMessage>,
        timer_tx: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        Self {
            pool: WaitingPool::new(config.capacity, config.min_players),
            config,
            grace: None,
            grace_epoch: 0,
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            outbox,
            timer_tx,
        }
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id).map(|e| &e.room)
    }

    pub fn room_of(&self, client_id: &ClientId) -> Option<&Room> {
        self.memberships
            .get(client_id)
            .and_then(|room_id| self.room(room_id))
    }

    pub fn grace_armed(&self) -> bool {
        self.grace.is_some()
    }

    fn send(&self, to: &ClientId, packet: Packet) {
        let message = GameMessage::SendToClient {
            packet,
            client_id: to.clone(),
        };
        if let Err(e) = self.outbox.send(message) {
            warn!("Failed to queue packet for {}: {}", to, e);
        }
    }

    fn broadcast_room(&self, room: &Room, packet: &Packet, exclude: Option<&ClientId>) {
        for member in room.members() {
            if Some(&member.client.id) == exclude {
                continue;
            }
            self.send(&member.client.id, packet.clone());
        }
    }

    fn broadcast_waiting_count(&self) {
        let count = self.pool.len();
        for client in self.pool.clients() {
            self.send(&client.id, Packet::WaitingForPlayers { count });
        }
    }

    /// Adds a client to the waiting pool and forms a room if the pool allows.
    pub fn handle_join(&mut self, client: Client) {
        if let Some(room_id) = self.memberships.get(&client.id) {
            debug!("Client {} asked to join while in {}", client.id, room_id);
            self.send(
                &client.id,
                Packet::Rejected {
                    reason: "already in a room".to_string(),
                },
            );
            return;
        }

        let count = self.pool.join(client);
        debug!("Waiting pool now holds {} client(s)", count);
        self.broadcast_waiting_count();
        self.evaluate_pool();
    }

    fn evaluate_pool(&mut self) {
        match self.pool.trigger() {
            FormationTrigger::Immediate => self.form_room(),
            FormationTrigger::Grace => {
                if self.grace.is_none() {
                    self.arm_grace();
                }
            }
            FormationTrigger::None => self.cancel_grace(),
        }
    }

    fn arm_grace(&mut self) {
        self.grace_epoch += 1;
        let epoch = self.grace_epoch;
        let delay = self.config.grace_window;
        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = timer_tx.send(TimerEvent::GraceExpired { epoch });
        });
        debug!("Grace window armed for {:?}", delay);
        self.grace = Some(GraceTimer { epoch, handle });
    }

    fn cancel_grace(&mut self) {
        if let Some(grace) = self.grace.take() {
            grace.handle.abort();
            debug!("Grace window cancelled");
        }
    }

    pub fn handle_grace_expired(&mut self, epoch: u64) {
        match &self.grace {
            Some(grace) if grace.epoch == epoch => {
                self.grace = None;
                self.form_room();
            }
            _ => debug!("Ignoring stale grace timer {}", epoch),
        }
    }

    fn form_room(&mut self) {
        self.cancel_grace();
        let waited = self.pool.longest_wait();
        let Some(clients) = self.pool.take_room() else {
            return;
        };

        let room = Room::form(RoomId::generate(), random_seed(), clients);
        let room_id = room.id().clone();
        let players: Vec<ClientId> = room.members().iter().map(|m| m.client.id.clone()).collect();
        let names: Vec<String> = room.members().iter().map(|m| m.client.name.clone()).collect();
        info!(
            "Formed {} with {} player(s) after {:?}",
            room_id,
            players.len(),
            waited.unwrap_or_default()
        );

        for member in room.members() {
            self.send(
                &member.client.id,
                Packet::MatchFound {
                    room_id: room_id.clone(),
                    seed: room.seed(),
                    player_index: member.player_index,
                    players: players.clone(),
                    names: names.clone(),
                },
            );
        }
        for id in players {
            self.memberships.insert(id, room_id.clone());
        }
        self.rooms.insert(room_id.clone(), RoomEntry { room, ticker: None });
        self.start_countdown(&room_id);

        if !self.pool.is_empty() {
            self.broadcast_waiting_count();
            self.evaluate_pool();
        }
    }

    fn start_countdown(&mut self, room_id: &RoomId) {
        let Some(entry) = self.rooms.get_mut(room_id) else {
            return;
        };
        entry.cancel_ticker();

        let generation = entry.room.generation();
        let period = self.config.countdown_interval;
        let countdown = Countdown::new(self.config.countdown_from);
        let timer_tx = self.timer_tx.clone();
        let room_id = room_id.clone();
        entry.ticker = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            for step in countdown {
                // First tick completes immediately
                ticks.tick().await;
                let event = TimerEvent::CountdownStep {
                    room_id: room_id.clone(),
                    generation,
                    step,
                };
                if timer_tx.send(event).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn handle_countdown_step(
        &mut self,
        room_id: &RoomId,
        generation: Generation,
        step: CountdownStep,
    ) {
        let Some(entry) = self.rooms.get_mut(room_id) else {
            debug!("Countdown step for vanished room {}", room_id);
            return;
        };
        if let Err(e) = entry.room.check_countdown(generation) {
            debug!("Dropping countdown step for {}: {}", room_id, e);
            return;
        }

        let packet = match step {
            CountdownStep::Tick(tick) => Packet::Countdown { generation, tick },
            CountdownStep::Start => {
                if let Err(e) = entry.room.begin_play(generation) {
                    debug!("Dropping start for {}: {}", room_id, e);
                    return;
                }
                entry.ticker = None;
                info!("{} generation {} is live", room_id, generation);
                Packet::StartGame { generation }
            }
        };
        let room = &self.rooms[room_id].room;
        self.broadcast_room(room, &packet, None);
    }

    fn lookup(&self, client_id: &ClientId) -> Result<(RoomId, PlayerIndex), CoordError> {
        let room_id = self
            .memberships
            .get(client_id)
            .ok_or_else(|| CoordError::NotInRoom(client_id.to_string()))?;
        let entry = self
            .rooms
            .get(room_id)
            .ok_or_else(|| CoordError::RoomNotFound(room_id.to_string()))?;
        let index = entry
            .room
            .index_of(client_id)
            .ok_or_else(|| CoordError::NotInRoom(client_id.to_string()))?;
        Ok((room_id.clone(), index))
    }

    /// Resolves the sender's room and checks that it only reports for itself.
    fn sender_slot(
        &self,
        client_id: &ClientId,
        claimed: PlayerIndex,
    ) -> Option<(RoomId, PlayerIndex)> {
        match self.lookup(client_id) {
            Ok((room_id, index)) if index == claimed => Some((room_id, index)),
            Ok((_, index)) => {
                warn!(
                    "Client {} (player {}) reported for player {}",
                    client_id, index, claimed
                );
                None
            }
            Err(e) => {
                debug!("Dropping message from {}: {}", client_id, e);
                None
            }
        }
    }

    pub fn handle_player_state(&mut self, client_id: &ClientId, state: PlayerSnapshot) {
        let Some((room_id, _)) = self.sender_slot(client_id, state.player_index) else {
            return;
        };
        let room = &self.rooms[&room_id].room;
        self.broadcast_room(room, &Packet::OpponentState { state }, Some(client_id));
    }

    pub fn handle_player_died(
        &mut self,
        client_id: &ClientId,
        player_index: PlayerIndex,
        generation: Generation,
    ) {
        let Some((room_id, index)) = self.sender_slot(client_id, player_index) else {
            return;
        };
        let Some(entry) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let outcome = match entry.room.apply_death(index, generation) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Ignoring death in {}: {}", room_id, e);
                return;
            }
        };

        let room = &self.rooms[&room_id].room;
        self.broadcast_room(
            room,
            &Packet::OpponentDied {
                player_index: index,
            },
            Some(client_id),
        );
        if outcome.round_over {
            info!("{} generation {}: all players died", room_id, generation);
            self.broadcast_room(room, &Packet::AllPlayersDied { generation }, None);
        }
    }

    pub fn handle_ready(
        &mut self,
        client_id: &ClientId,
        player_index: PlayerIndex,
        generation: Generation,
    ) {
        let Some((room_id, index)) = self.sender_slot(client_id, player_index) else {
            return;
        };
        let Some(entry) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let outcome = match entry.room.mark_ready(index, generation) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Ignoring ready in {}: {}", room_id, e);
                return;
            }
        };

        let room = &self.rooms[&room_id].room;
        self.broadcast_room(
            room,
            &Packet::ReadyUpdate {
                ready: outcome.ready,
                total: outcome.total,
                generation,
            },
            None,
        );
        if outcome.restart_due {
            self.restart_room(&room_id);
        }
    }

    /// Handles an explicit leave or a lost connection.
    pub fn handle_disconnect(&mut self, client_id: &ClientId) {
        if self.pool.remove(client_id) {
            debug!("Client {} left the waiting pool", client_id);
            self.broadcast_waiting_count();
            if self.pool.trigger() == FormationTrigger::None {
                self.cancel_grace();
            }
        }

        let Some(room_id) = self.memberships.remove(client_id) else {
            return;
        };
        let Some(entry) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(index) = entry.room.index_of(client_id) else {
            return;
        };
        let outcome = match entry.room.remove_member(index) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to remove {} from {}: {}", client_id, room_id, e);
                return;
            }
        };
        info!("Player {} left {}", index, room_id);

        if outcome.emptied {
            self.rooms.remove(&room_id);
            info!("{} destroyed", room_id);
            return;
        }

        let room = &self.rooms[&room_id].room;
        self.broadcast_room(
            room,
            &Packet::OpponentDisconnected {
                player_index: index,
            },
            None,
        );
        if outcome.round_over {
            let generation = room.generation();
            self.broadcast_room(room, &Packet::AllPlayersDied { generation }, None);
        }
        if outcome.restart_due {
            self.restart_room(&room_id);
        }
    }

    fn restart_room(&mut self, room_id: &RoomId) {
        let Some(entry) = self.rooms.get_mut(room_id) else {
            return;
        };
        let seed = random_seed();
        let previous = entry.room.generation();
        match entry.room.restart(seed, previous) {
            Ok(next) => info!("{} restarting as generation {}", room_id, next),
            Err(e) => {
                warn!("Restart of {} refused: {}", room_id, e);
                return;
            }
        }
        entry.cancel_ticker();

        let room = &self.rooms[room_id].room;
        self.broadcast_room(
            room,
            &Packet::RestartMatch {
                seed,
                generation: previous,
            },
            None,
        );
        self.start_countdown(room_id);
    }
}
