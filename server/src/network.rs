//! Server network layer handling UDP communications and the coordination loop

use crate::client_manager::ClientManager;
use crate::coordinator::{Coordinator, TimerEvent};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Client, ClientId, MatchConfig, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: ClientId },
    Shutdown,
}

/// Messages sent from the coordination loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    SendToClient { packet: Packet, client_id: ClientId },
}

/// Matchmaking arbiter for the centralized topology
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    coordinator: Coordinator,
    check_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: MatchConfig,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Arbiter listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let clients = ClientManager::new(max_clients, config.client_timeout);
        let check_interval = config.heartbeat_interval;
        let coordinator = Coordinator::new(config, game_tx.clone(), timer_tx);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(clients)),
            coordinator,
            check_interval,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
            timer_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that stops the loop started by [`Server::run`].
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                let (packet, addr) = match message {
                    GameMessage::SendPacket { packet, addr } => (packet, addr),
                    GameMessage::SendToClient { packet, client_id } => {
                        let addr = clients.read().await.addr_of(&client_id);
                        match addr {
                            Some(addr) => (packet, addr),
                            None => {
                                debug!("No address for {}, dropping {:?}", client_id, packet);
                                continue;
                            }
                        }
                    }
                };

                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let period = self.check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for connection in timed_out {
                    info!("Endpoint {} timed out", connection.addr);
                    let Some(client_id) = connection.client_id else {
                        continue;
                    };
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes an incoming packet and feeds the coordinator
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let known = self.clients.write().await.touch(addr);
        if !known {
            warn!("Rejecting {}: server full", addr);
            if matches!(packet, Packet::JoinRequest { .. }) {
                let reason = "Server full".to_string();
                self.send_packet(Packet::Rejected { reason }, addr);
            }
            return;
        }

        if let Packet::JoinRequest { id, name } = packet {
            info!("Join request from {} as {} ({})", addr, id, name);
            let replaced = self.clients.write().await.bind(addr, id.clone());
            if let Some(previous) = replaced {
                self.coordinator.handle_disconnect(&previous);
            }
            self.coordinator.handle_join(Client::new(id, &name));
            return;
        }

        let client_id = self.clients.read().await.client_at(addr).cloned();
        let Some(client_id) = client_id else {
            if !matches!(packet, Packet::Heartbeat) {
                warn!("Packet from {} before join: {:?}", addr, packet);
            }
            return;
        };

        match packet {
            Packet::PlayerState { state } => {
                self.coordinator.handle_player_state(&client_id, state)
            }
            Packet::PlayerDied {
                player_index,
                generation,
            } => self
                .coordinator
                .handle_player_died(&client_id, player_index, generation),
            Packet::ReadyRestart {
                player_index,
                generation,
            } => self
                .coordinator
                .handle_ready(&client_id, player_index, generation),
            Packet::Heartbeat => {}
            Packet::Leave => {
                info!("Client {} left", client_id);
                self.clients.write().await.remove(addr);
                self.coordinator.handle_disconnect(&client_id);
            }
            other => warn!("Unexpected packet type from {}: {:?}", addr, other),
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::GraceExpired { epoch } => self.coordinator.handle_grace_expired(epoch),
            TimerEvent::CountdownStep {
                room_id,
                generation,
                step,
            } => self
                .coordinator
                .handle_countdown_step(&room_id, generation, step),
        }
    }

    /// Main server loop; every coordination event is handled here in order
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.coordinator.handle_disconnect(&client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                Some(event) = self.timer_rx.recv() => {
                    self.handle_timer(event);
                },
            }
        }

        Ok(())
    }
}
