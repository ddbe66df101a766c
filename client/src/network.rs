use crate::error::ClientError;
use crate::events::{ClientEvent, Command, ConnectionStatus};
use crate::handle::SessionHandle;
use crate::round::LocalRound;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Client, ClientId, MatchConfig, Packet};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Session against a central arbiter (centralized topology)
pub struct ArbiterClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: ClientId,
    config: MatchConfig,
    joined: bool,
    connected: bool,
    /// Resent on every heartbeat until the server first answers.
    pending_join: Option<Packet>,
    round: Option<LocalRound>,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ArbiterClient {
    /// Binds a local socket and spawns the session task.
    pub async fn start(
        server_addr: SocketAddr,
        config: MatchConfig,
    ) -> Result<SessionHandle, ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let client_id = ClientId::generate();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();

        let client = ArbiterClient {
            socket,
            server_addr,
            client_id: client_id.clone(),
            config,
            joined: false,
            connected: false,
            pending_join: None,
            round: None,
            commands,
            events,
        };
        let task = tokio::spawn(client.run());
        Ok(SessionHandle::new(client_id, command_tx, event_rx, task))
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), ClientError> {
        match command {
            Command::Join { name } => {
                let me = Client::new(self.client_id.clone(), &name);
                info!("Joining as {} ({})", me.name, me.id);
                self.joined = true;
                let request = Packet::JoinRequest {
                    id: me.id,
                    name: me.name,
                };
                self.send_packet(&request).await?;
                self.pending_join = Some(request);
            }
            Command::ReportState { y, velocity, score } => {
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                round.set_score(score);
                if let Some(state) = round.snapshot(y, velocity) {
                    self.send_packet(&Packet::PlayerState { state }).await?;
                }
            }
            Command::ReportDied => {
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                let Some(event) = round.own_death() else {
                    return Ok(());
                };
                let packet = Packet::PlayerDied {
                    player_index: round.player_index(),
                    generation: round.generation(),
                };
                self.emit(event);
                self.send_packet(&packet).await?;
            }
            Command::ReadyRestart => {
                let Some(round) = self.round.as_mut() else {
                    return Ok(());
                };
                if let Some(generation) = round.request_ready() {
                    let packet = Packet::ReadyRestart {
                        player_index: round.player_index(),
                        generation,
                    };
                    self.send_packet(&packet).await?;
                }
            }
            Command::Leave => {}
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) {
        if !self.connected {
            self.connected = true;
            self.pending_join = None;
            self.emit(ClientEvent::ConnectionStatus(ConnectionStatus::Connected));
        }

        match packet {
            Packet::WaitingForPlayers { count } => {
                self.emit(ClientEvent::WaitingCountChanged(count));
            }

            Packet::MatchFound {
                room_id,
                seed,
                player_index,
                players,
                names,
            } => {
                if self.round.is_some() {
                    debug!("Ignoring second match {}", room_id);
                    return;
                }
                info!(
                    "Matched into {} as player {} of {}",
                    room_id,
                    player_index,
                    players.len()
                );
                self.round = Some(LocalRound::new(
                    player_index,
                    players.len(),
                    seed,
                    self.config.medals,
                ));
                self.emit(ClientEvent::MatchFound {
                    room_id,
                    seed,
                    player_index,
                    names,
                });
            }

            Packet::Countdown { generation, tick } => {
                if let Some(round) = &self.round {
                    if round.accepts_countdown(generation) {
                        self.emit(ClientEvent::CountdownTick(tick));
                    }
                }
            }

            Packet::StartGame { generation } => {
                if let Some(round) = self.round.as_mut() {
                    if round.start(generation) {
                        self.emit(ClientEvent::RoundStarted);
                    }
                }
            }

            Packet::OpponentState { state } => {
                self.emit(ClientEvent::OpponentStateChanged(state));
            }

            Packet::OpponentDied { player_index } => {
                let Some(round) = self.round.as_mut() else {
                    return;
                };
                let follow_up = round.opponent_died(player_index);
                self.emit(ClientEvent::OpponentDied(player_index));
                if let Some(event) = follow_up {
                    self.emit(event);
                }
            }

            Packet::OpponentDisconnected { player_index } => {
                let Some(round) = self.round.as_mut() else {
                    return;
                };
                let follow_up = round.opponent_left(player_index);
                self.emit(ClientEvent::OpponentDisconnected(player_index));
                if let Some(event) = follow_up {
                    self.emit(event);
                }
            }

            Packet::AllPlayersDied { generation } => {
                if let Some(event) = self.round.as_mut().and_then(|r| r.round_over(generation)) {
                    self.emit(event);
                }
            }

            Packet::ReadyUpdate {
                ready,
                total,
                generation,
            } => {
                if self.round.as_ref().map(|r| r.generation()) == Some(generation) {
                    self.emit(ClientEvent::ReadyCountChanged { ready, total });
                }
            }

            Packet::RestartMatch { seed, generation } => {
                let restarted = self.round.as_mut().and_then(|r| r.restart(seed, generation));
                if let Some(generation) = restarted {
                    info!("Round restarting as generation {}", generation);
                    self.emit(ClientEvent::RoundRestarted { seed, generation });
                }
            }

            Packet::Rejected { reason } => {
                warn!("Rejected by server: {}", reason);
                self.emit(ClientEvent::ConnectionStatus(ConnectionStatus::Rejected(
                    reason,
                )));
            }

            other => {
                warn!("Unexpected packet type: {:?}", other);
            }
        }
    }

    pub async fn run(mut self) {
        let mut heartbeat = interval(self.config.heartbeat_interval);
        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Leave) | None => break,
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            error!("Error sending to server: {}", e);
                        }
                    }
                },

                result = self.socket.recv_from(&mut buffer) => match result {
                    Ok((len, addr)) => {
                        if addr != self.server_addr {
                            warn!("Ignoring datagram from {}", addr);
                            continue;
                        }
                        match deserialize::<Packet>(&buffer[0..len]) {
                            Ok(packet) => self.handle_packet(packet),
                            Err(_) => warn!("Failed to deserialize packet from server"),
                        }
                    },
                    Err(e) => error!("Error receiving packet: {}", e),
                },

                _ = heartbeat.tick() => {
                    let packet = match &self.pending_join {
                        Some(request) => {
                            debug!("No answer yet, resending join");
                            request.clone()
                        }
                        None if self.joined => Packet::Heartbeat,
                        None => continue,
                    };
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending heartbeat: {}", e);
                    }
                },
            }
        }

        if self.joined {
            let _ = self.send_packet(&Packet::Leave).await;
        }
        info!("Session {} ended", self.client_id);
        self.emit(ClientEvent::ConnectionStatus(ConnectionStatus::Disconnected));
    }
}
