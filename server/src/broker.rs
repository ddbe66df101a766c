//! Topic broker for the peer-to-peer topology
//!
//! A deliberately small publish/subscribe relay over UDP. Peers subscribe to
//! topics, publish opaque payloads and register wills. Every publication is
//! delivered to all current subscribers of its topic, the publisher included.
//! When a peer falls silent for longer than the client timeout, each of its
//! wills is published on its topic and its subscriptions are dropped. A
//! clean disconnect drops the subscriptions and discards the wills.
//!
//! The broker knows nothing about rooms; all coordination happens in the
//! peers.

use crate::client_manager::ClientManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::BrokerPacket;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug)]
pub enum BrokerEvent {
    PacketReceived { packet: BrokerPacket, addr: SocketAddr },
    PeerTimeout { addr: SocketAddr },
    Shutdown,
}

/// Routing state, independent of the socket
#[derive(Debug, Default)]
pub struct Topics {
    subscribers: HashMap<String, HashSet<SocketAddr>>,
    wills: HashMap<SocketAddr, BTreeMap<String, Vec<u8>>>,
}

impl Topics {
    pub fn subscribe(&mut self, addr: SocketAddr, topic: String) {
        self.subscribers.entry(topic).or_default().insert(addr);
    }

    pub fn unsubscribe(&mut self, addr: SocketAddr, topic: &str) {
        if let Some(set) = self.subscribers.get_mut(topic) {
            set.remove(&addr);
            if set.is_empty() {
                self.subscribers.remove(topic);
            }
        }
    }

    /// Registers a will on `topic`; an empty payload clears it.
    pub fn set_will(&mut self, addr: SocketAddr, topic: String, payload: Vec<u8>) {
        let wills = self.wills.entry(addr).or_default();
        if payload.is_empty() {
            wills.remove(&topic);
        } else {
            wills.insert(topic, payload);
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<SocketAddr> {
        self.subscribers
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forgets a peer entirely, returning the wills it left behind.
    pub fn drop_peer(&mut self, addr: SocketAddr) -> Vec<(String, Vec<u8>)> {
        self.subscribers.retain(|_, set| {
            set.remove(&addr);
            !set.is_empty()
        });
        self.wills
            .remove(&addr)
            .map(|wills| wills.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.subscribers.len()
    }
}

pub struct Broker {
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<ClientManager>>,
    topics: Topics,
    check_interval: Duration,

    event_tx: mpsc::UnboundedSender<BrokerEvent>,
    event_rx: mpsc::UnboundedReceiver<BrokerEvent>,
    out_tx: mpsc::UnboundedSender<(BrokerPacket, SocketAddr)>,
    out_rx: mpsc::UnboundedReceiver<(BrokerPacket, SocketAddr)>,
}

impl Broker {
    pub async fn new(
        addr: &str,
        peer_timeout: Duration,
        check_interval: Duration,
        max_peers: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Broker listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Broker {
            socket,
            peers: Arc::new(RwLock::new(ClientManager::new(max_peers, peer_timeout))),
            topics: Topics::default(),
            check_interval,
            event_tx,
            event_rx,
            out_tx,
            out_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<BrokerEvent> {
        self.event_tx.clone()
    }

    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; 65536];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<BrokerPacket>(&buffer[..len]) {
                        Ok(packet) => {
                            if event_tx
                                .send(BrokerEvent::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(_) => warn!("Failed to deserialize packet from {}", addr),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some((packet, addr)) = out_rx.recv().await {
                let data = match serialize(&packet) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode packet: {}", e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&data, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    fn spawn_timeout_checker(&self) {
        let peers = Arc::clone(&self.peers);
        let event_tx = self.event_tx.clone();
        let period = self.check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let timed_out = peers.write().await.check_timeouts();
                for connection in timed_out {
                    let addr = connection.addr;
                    if event_tx.send(BrokerEvent::PeerTimeout { addr }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    fn publish(&self, topic: String, payload: Vec<u8>) {
        let targets = self.topics.subscribers(&topic);
        debug!("Publishing {} bytes on {} to {} peer(s)", payload.len(), topic, targets.len());
        for addr in targets {
            let packet = BrokerPacket::Deliver {
                topic: topic.clone(),
                payload: payload.clone(),
            };
            if let Err(e) = self.out_tx.send((packet, addr)) {
                error!("Failed to queue delivery: {}", e);
            }
        }
    }

    fn release_peer(&mut self, addr: SocketAddr) {
        let wills = self.topics.drop_peer(addr);
        if !wills.is_empty() {
            info!("Publishing {} will(s) for {}", wills.len(), addr);
        }
        for (topic, payload) in wills {
            self.publish(topic, payload);
        }
    }

    async fn handle_packet(&mut self, packet: BrokerPacket, addr: SocketAddr) {
        if !self.peers.write().await.touch(addr) {
            warn!("Ignoring {}: broker full", addr);
            return;
        }

        match packet {
            BrokerPacket::Subscribe { topic } => {
                debug!("{} subscribed to {}", addr, topic);
                self.topics.subscribe(addr, topic);
            }
            BrokerPacket::Unsubscribe { topic } => self.topics.unsubscribe(addr, &topic),
            BrokerPacket::Publish { topic, payload } => self.publish(topic, payload),
            BrokerPacket::SetWill { topic, payload } => self.topics.set_will(addr, topic, payload),
            BrokerPacket::Heartbeat => {}
            BrokerPacket::Disconnect => {
                debug!("{} disconnected cleanly", addr);
                self.peers.write().await.remove(addr);
                self.topics.drop_peer(addr);
            }
            BrokerPacket::Deliver { .. } => warn!("Peer {} sent a delivery packet", addr),
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Broker started successfully");

        while let Some(event) = self.event_rx.recv().await {
            match event {
                BrokerEvent::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await
                }
                BrokerEvent::PeerTimeout { addr } => {
                    info!("Peer {} timed out", addr);
                    self.release_peer(addr);
                }
                BrokerEvent::Shutdown => break,
            }
        }

        info!("Broker shutting down");
        Ok(())
    }
}
