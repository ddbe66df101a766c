//! Peer-to-peer session over a [`Bus`]
//!
//! Without an arbiter, every member runs the same coordination logic:
//!
//! - **Lobby.** Peers announce themselves on the lobby topic and answer
//!   newcomers with their presence, so each keeps an arrival-ordered view of
//!   who is waiting (itself first). The peer with the smallest id in its own
//!   view is the leader. Once the view allows a room the leader waits a
//!   short, jittered announce delay (plus the grace window when below
//!   capacity) and publishes the room.
//! - **Acceptance.** The first room listing us wins; later listings and
//!   duplicate deliveries are ignored.
//! - **Room.** Each member keeps a full [`Room`] mirror and applies every
//!   message on the room topic, its own included since the broker echoes
//!   them. The member with the lowest remaining index drives the countdown
//!   and announces restarts; if it leaves, the next lowest takes over.
//!
//! Departures are announced by wills registered with the broker.

use crate::bus::{Bus, Deliveries, Delivery};
use crate::error::ClientError;
use crate::events::{ClientEvent, Command, ConnectionStatus};
use crate::handle::SessionHandle;
use crate::round::LocalRound;
use log::{debug, error, info, warn};
use rand::Rng;
use shared::pool::FormationTrigger;
use shared::protocol::{decode, encode};
use shared::{
    elect_leader, random_seed, Client, ClientId, Countdown, CountdownStep, Generation,
    MatchConfig, PeerMessage, PlayerIndex, Room, RoomId, RoundPhase, WaitingPool, LOBBY_TOPIC,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

#[derive(Debug)]
enum PeerTimer {
    Announce {
        epoch: u64,
    },
    Countdown {
        generation: Generation,
        step: CountdownStep,
    },
}

struct AnnounceTimer {
    epoch: u64,
    at_capacity: bool,
    handle: JoinHandle<()>,
}

enum Stage {
    Idle,
    Lobby,
    InRoom,
}

pub struct PeerClient<B: Bus> {
    bus: B,
    deliveries: Deliveries,
    config: MatchConfig,
    client_id: ClientId,
    me: Option<Client>,
    stage: Stage,

    pool: WaitingPool,
    announce: Option<AnnounceTimer>,
    announce_epoch: u64,

    room: Option<Room>,
    round: Option<LocalRound>,
    ticker: Option<JoinHandle<()>>,

    timer_tx: mpsc::UnboundedSender<PeerTimer>,
    timer_rx: mpsc::UnboundedReceiver<PeerTimer>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<B: Bus + 'static> PeerClient<B> {
    /// Spawns a session over an already connected bus.
    pub fn start(bus: B, deliveries: Deliveries, config: MatchConfig) -> SessionHandle {
        Self::start_as(ClientId::generate(), bus, deliveries, config)
    }

    /// As [`PeerClient::start`] with a caller-chosen id.
    pub fn start_as(
        client_id: ClientId,
        bus: B,
        deliveries: Deliveries,
        config: MatchConfig,
    ) -> SessionHandle {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let client = PeerClient {
            bus,
            deliveries,
            pool: WaitingPool::new(config.capacity, config.min_players),
            config,
            client_id: client_id.clone(),
            me: None,
            stage: Stage::Idle,
            announce: None,
            announce_epoch: 0,
            room: None,
            round: None,
            ticker: None,
            timer_tx,
            timer_rx,
            commands,
            events,
        };
        let task = tokio::spawn(client.run());
        SessionHandle::new(client_id, command_tx, event_rx, task)
    }
}

impl<B: Bus> PeerClient<B> {
    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn publish(&self, topic: &str, message: &PeerMessage) -> Result<(), ClientError> {
        self.bus.publish(topic, encode(message)?)
    }

    fn room_topic(&self) -> Option<String> {
        self.room.as_ref().map(|r| r.id().topic())
    }

    fn my_index(&self) -> Option<PlayerIndex> {
        self.round.as_ref().map(|r| r.player_index())
    }

    fn is_driver(&self) -> bool {
        match (&self.room, self.my_index()) {
            (Some(room), Some(index)) => room.driver() == Some(index),
            _ => false,
        }
    }

    // ---- lobby ----

    fn join_lobby(&mut self, name: &str) {
        if !matches!(self.stage, Stage::Idle) {
            debug!("Join ignored: already matchmaking or matched");
            return;
        }
        let me = Client::new(self.client_id.clone(), name);
        info!("Entering lobby as {} ({})", me.name, me.id);

        if let Err(e) = self.enter_lobby(&me) {
            warn!("Could not enter lobby: {}", e);
            self.abandon_lobby();
            self.emit(ClientEvent::ConnectionStatus(ConnectionStatus::Rejected(
                format!("Lobby unavailable: {}", e),
            )));
            return;
        }
        self.me = Some(me);
        self.stage = Stage::Lobby;
        self.emit(ClientEvent::ConnectionStatus(ConnectionStatus::Connected));
        self.lobby_changed();
    }

    fn enter_lobby(&mut self, me: &Client) -> Result<(), ClientError> {
        self.bus.subscribe(LOBBY_TOPIC)?;
        self.bus.set_will(
            LOBBY_TOPIC,
            encode(&PeerMessage::Gone { id: me.id.clone() })?,
        )?;
        self.pool.join(me.clone());
        self.publish(
            LOBBY_TOPIC,
            &PeerMessage::Hello {
                id: me.id.clone(),
                name: me.name.clone(),
            },
        )
    }

    /// Undoes a partial lobby entry so a later join starts clean.
    fn abandon_lobby(&mut self) {
        if let Err(e) = self.bus.unsubscribe(LOBBY_TOPIC) {
            debug!("Unsubscribe after failed join: {}", e);
        }
        if let Err(e) = self.bus.set_will(LOBBY_TOPIC, Vec::new()) {
            debug!("Clearing will after failed join: {}", e);
        }
        self.pool = WaitingPool::new(self.config.capacity, self.config.min_players);
    }

    fn lobby_changed(&mut self) {
        self.emit(ClientEvent::WaitingCountChanged(self.pool.len()));
        self.evaluate_announce();
    }

    fn is_leader(&self) -> bool {
        let ids = self.pool.ids();
        elect_leader(&ids) == Some(&self.client_id)
    }

    fn evaluate_announce(&mut self) {
        let trigger = self.pool.trigger();
        if trigger == FormationTrigger::None || !self.is_leader() {
            self.cancel_announce();
            return;
        }
        let at_capacity = trigger == FormationTrigger::Immediate;
        match &self.announce {
            Some(timer) if timer.at_capacity || !at_capacity => {}
            _ => self.arm_announce(at_capacity),
        }
    }

    fn arm_announce(&mut self, at_capacity: bool) {
        self.cancel_announce();
        self.announce_epoch += 1;
        let epoch = self.announce_epoch;

        let jitter_ms = self.config.announce_jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        let mut delay = self.config.announce_delay + jitter;
        if !at_capacity {
            delay += self.config.grace_window;
        }
        debug!("Leader announce in {:?} (at capacity: {})", delay, at_capacity);

        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = timer_tx.send(PeerTimer::Announce { epoch });
        });
        self.announce = Some(AnnounceTimer {
            epoch,
            at_capacity,
            handle,
        });
    }

    fn cancel_announce(&mut self) {
        if let Some(timer) = self.announce.take() {
            timer.handle.abort();
        }
    }

    fn announce_fired(&mut self, epoch: u64) -> Result<(), ClientError> {
        match &self.announce {
            Some(timer) if timer.epoch == epoch => self.announce = None,
            _ => return Ok(()),
        }
        if !matches!(self.stage, Stage::Lobby) || !self.is_leader() {
            return Ok(());
        }
        let Some(clients) = self.pool.take_room() else {
            return Ok(());
        };

        let room_id = RoomId::generate();
        info!("Announcing {} with {} player(s)", room_id, clients.len());
        let message = PeerMessage::MatchFound {
            room_id,
            seed: random_seed(),
            members: clients.iter().map(|c| c.id.clone()).collect(),
            names: clients.into_iter().map(|c| c.name).collect(),
        };
        self.publish(LOBBY_TOPIC, &message)
    }

    fn handle_lobby(&mut self, message: PeerMessage) -> Result<(), ClientError> {
        if !matches!(self.stage, Stage::Lobby) {
            return Ok(());
        }
        match message {
            PeerMessage::Hello { id, name } => {
                if id == self.client_id {
                    return Ok(());
                }
                self.pool.join(Client::new(id, &name));
                if let Some(me) = &self.me {
                    let presence = PeerMessage::Presence {
                        id: me.id.clone(),
                        name: me.name.clone(),
                    };
                    self.publish(LOBBY_TOPIC, &presence)?;
                }
                self.lobby_changed();
            }
            PeerMessage::Presence { id, name } => {
                if id == self.client_id || self.pool.contains(&id) {
                    return Ok(());
                }
                self.pool.join(Client::new(id, &name));
                self.lobby_changed();
            }
            PeerMessage::Gone { id } => {
                if self.pool.remove(&id) {
                    self.lobby_changed();
                }
            }
            PeerMessage::MatchFound {
                room_id,
                seed,
                members,
                names,
            } => {
                if members.contains(&self.client_id) {
                    self.accept(room_id, seed, members, names)?;
                } else {
                    self.pool.remove_all(&members);
                    self.lobby_changed();
                }
            }
            other => warn!("Unexpected lobby message {:?}", other),
        }
        Ok(())
    }

    fn accept(
        &mut self,
        room_id: RoomId,
        seed: f64,
        members: Vec<ClientId>,
        names: Vec<String>,
    ) -> Result<(), ClientError> {
        self.cancel_announce();
        self.bus.unsubscribe(LOBBY_TOPIC)?;
        self.bus.set_will(LOBBY_TOPIC, Vec::new())?;
        self.pool = WaitingPool::new(self.config.capacity, self.config.min_players);

        let clients: Vec<Client> = members
            .iter()
            .zip(names.iter().map(String::as_str).chain(std::iter::repeat("")))
            .map(|(id, name)| Client::new(id.clone(), name))
            .collect();
        let room = Room::form(room_id.clone(), seed, clients);
        let Some(player_index) = room.index_of(&self.client_id) else {
            return Ok(());
        };
        info!("Joined {} as player {}", room_id, player_index);

        let topic = room.id().topic();
        self.bus.subscribe(&topic)?;
        self.bus
            .set_will(&topic, encode(&PeerMessage::PlayerDisconnected { player_index })?)?;

        self.round = Some(LocalRound::new(
            player_index,
            room.member_count(),
            seed,
            self.config.medals,
        ));
        let names = room.members().iter().map(|m| m.client.name.clone()).collect();
        self.room = Some(room);
        self.stage = Stage::InRoom;
        self.emit(ClientEvent::MatchFound {
            room_id,
            seed,
            player_index,
            names,
        });

        if self.is_driver() {
            self.start_countdown();
        }
        Ok(())
    }

    // ---- room ----

    fn start_countdown(&mut self) {
        self.cancel_ticker();
        let Some(room) = &self.room else {
            return;
        };
        let generation = room.generation();
        let period = self.config.countdown_interval;
        let countdown = Countdown::new(self.config.countdown_from);
        let timer_tx = self.timer_tx.clone();
        debug!("Driving countdown for generation {}", generation);

        self.ticker = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            for step in countdown {
                ticks.tick().await;
                if timer_tx.send(PeerTimer::Countdown { generation, step }).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn countdown_step(
        &mut self,
        generation: Generation,
        step: CountdownStep,
    ) -> Result<(), ClientError> {
        let (Some(room), Some(topic)) = (&self.room, self.room_topic()) else {
            return Ok(());
        };
        if room.check_countdown(generation).is_err() || !self.is_driver() {
            return Ok(());
        }
        let message = match step {
            CountdownStep::Tick(tick) => PeerMessage::CountdownTick { generation, tick },
            CountdownStep::Start => PeerMessage::StartGame { generation },
        };
        self.publish(&topic, &message)
    }

    fn announce_restart(&self) -> Result<(), ClientError> {
        let (Some(room), Some(topic)) = (&self.room, self.room_topic()) else {
            return Ok(());
        };
        let message = PeerMessage::RestartMatch {
            seed: random_seed(),
            generation: room.generation(),
        };
        self.publish(&topic, &message)
    }

    fn handle_room(&mut self, message: PeerMessage) -> Result<(), ClientError> {
        let Some(room) = self.room.as_mut() else {
            return Ok(());
        };
        let Some(round) = self.round.as_mut() else {
            return Ok(());
        };
        let me = round.player_index();

        match message {
            PeerMessage::CountdownTick { generation, tick } => {
                if room.check_countdown(generation).is_ok() && round.accepts_countdown(generation)
                {
                    self.emit(ClientEvent::CountdownTick(tick));
                }
            }

            PeerMessage::StartGame { generation } => match room.begin_play(generation) {
                Ok(()) => {
                    round.start(generation);
                    self.ticker = None;
                    self.emit(ClientEvent::RoundStarted);
                }
                Err(e) => debug!("Ignoring start: {}", e),
            },

            PeerMessage::PlayerState { state } => {
                if state.player_index != me && room.is_alive(state.player_index) {
                    self.emit(ClientEvent::OpponentStateChanged(state));
                }
            }

            PeerMessage::PlayerDied {
                player_index,
                generation,
            } => {
                let outcome = match room.apply_death(player_index, generation) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!("Ignoring death: {}", e);
                        return Ok(());
                    }
                };
                let mut follow_up = Vec::new();
                if player_index != me {
                    follow_up.push(ClientEvent::OpponentDied(player_index));
                    follow_up.extend(round.opponent_died(player_index));
                }
                if outcome.round_over {
                    follow_up.extend(round.round_over(generation));
                }
                for event in follow_up {
                    self.emit(event);
                }
            }

            PeerMessage::PlayerDisconnected { player_index } => {
                if player_index == me {
                    return Ok(());
                }
                let previous_driver = room.driver();
                let outcome = match room.remove_member(player_index) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!("Ignoring departure: {}", e);
                        return Ok(());
                    }
                };
                info!("Player {} left the room", player_index);
                let generation = room.generation();
                let driver_changed = room.driver() != previous_driver;
                let counting_down = room.phase() == RoundPhase::Countdown;

                let mut follow_up = vec![ClientEvent::OpponentDisconnected(player_index)];
                follow_up.extend(round.opponent_left(player_index));
                if outcome.round_over {
                    follow_up.extend(round.round_over(generation));
                }
                for event in follow_up {
                    self.emit(event);
                }

                if self.is_driver() {
                    if driver_changed && counting_down {
                        info!("Taking over countdown for generation {}", generation);
                        self.start_countdown();
                    }
                    if outcome.restart_due {
                        self.announce_restart()?;
                    }
                }
            }

            PeerMessage::ReadyRestart {
                player_index,
                generation,
            } => {
                let outcome = match room.mark_ready(player_index, generation) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!("Ignoring ready: {}", e);
                        return Ok(());
                    }
                };
                self.emit(ClientEvent::ReadyCountChanged {
                    ready: outcome.ready,
                    total: outcome.total,
                });
                if outcome.restart_due && self.is_driver() {
                    self.announce_restart()?;
                }
            }

            PeerMessage::RestartMatch { seed, generation } => {
                let next = match room.restart(seed, generation) {
                    Ok(next) => next,
                    Err(e) => {
                        debug!("Ignoring restart: {}", e);
                        return Ok(());
                    }
                };
                round.restart(seed, generation);
                info!("Room restarting as generation {}", next);
                self.emit(ClientEvent::RoundRestarted {
                    seed,
                    generation: next,
                });
                if self.is_driver() {
                    self.start_countdown();
                }
            }

            other => warn!("Unexpected room message {:?}", other),
        }
        Ok(())
    }

    fn handle_delivery(&mut self, delivery: Delivery) -> Result<(), ClientError> {
        let message: PeerMessage = match decode(&delivery.payload) {
            Ok(message) => message,
            Err(_) => {
                warn!("Failed to decode message on {}", delivery.topic);
                return Ok(());
            }
        };
        if delivery.topic == LOBBY_TOPIC {
            self.handle_lobby(message)
        } else if Some(&delivery.topic) == self.room_topic().as_ref() {
            self.handle_room(message)
        } else {
            debug!("Ignoring message on stale topic {}", delivery.topic);
            Ok(())
        }
    }

    // ---- commands ----

    fn handle_command(&mut self, command: Command) -> Result<(), ClientError> {
        match command {
            Command::Join { name } => self.join_lobby(&name),
            Command::ReportState { y, velocity, score } => {
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                round.set_score(score);
                if let (Some(state), Some(topic)) = (round.snapshot(y, velocity), self.room_topic())
                {
                    self.publish(&topic, &PeerMessage::PlayerState { state })?;
                }
            }
            Command::ReportDied => {
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                let Some(event) = round.own_death() else {
                    return Ok(());
                };
                let message = PeerMessage::PlayerDied {
                    player_index: round.player_index(),
                    generation: round.generation(),
                };
                self.emit(event);
                if let Some(topic) = self.room_topic() {
                    self.publish(&topic, &message)?;
                }
            }
            Command::ReadyRestart => {
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                if let Some(generation) = round.request_ready() {
                    let message = PeerMessage::ReadyRestart {
                        player_index: round.player_index(),
                        generation,
                    };
                    if let Some(topic) = self.room_topic() {
                        self.publish(&topic, &message)?;
                    }
                }
            }
            Command::Leave => {}
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.cancel_announce();
        self.cancel_ticker();
        let farewell = match self.stage {
            Stage::Idle => None,
            Stage::Lobby => Some((
                LOBBY_TOPIC.to_string(),
                PeerMessage::Gone {
                    id: self.client_id.clone(),
                },
            )),
            Stage::InRoom => self.room_topic().zip(
                self.my_index()
                    .map(|player_index| PeerMessage::PlayerDisconnected { player_index }),
            ),
        };
        if let Some((topic, message)) = farewell {
            if let Err(e) = self.publish(&topic, &message) {
                warn!("Failed to announce departure: {}", e);
            }
        }
        if let Err(e) = self.bus.disconnect() {
            debug!("Disconnect: {}", e);
        }
    }

    pub async fn run(mut self) {
        loop {
            let result = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Leave) | None => break,
                    Some(command) => self.handle_command(command),
                },

                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => self.handle_delivery(delivery),
                    None => {
                        error!("Bus closed");
                        break;
                    }
                },

                Some(timer) = self.timer_rx.recv() => match timer {
                    PeerTimer::Announce { epoch } => self.announce_fired(epoch),
                    PeerTimer::Countdown { generation, step } => {
                        self.countdown_step(generation, step)
                    }
                },
            };
            if let Err(e) = result {
                error!("Bus error: {}", e);
            }
        }

        self.leave();
        info!("Session {} ended", self.client_id);
        self.emit(ClientEvent::ConnectionStatus(ConnectionStatus::Disconnected));
    }
}

impl<B: Bus> Drop for PeerClient<B> {
    fn drop(&mut self) {
        self.cancel_announce();
        self.cancel_ticker();
    }
}
