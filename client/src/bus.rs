//! Publish/subscribe transports for the peer-to-peer topology
//!
//! A [`Bus`] is one member's connection to a topic broker. Publications are
//! echoed back to the publisher, and every connection may leave wills that
//! the broker publishes if the connection is lost without a clean
//! [`Bus::disconnect`]. Deliveries arrive on the channel handed out when the
//! connection is made.
//!
//! Two transports are provided: [`LocalBroker`] keeps everything in process,
//! [`UdpBus`] talks to the server's broker mode.

use crate::error::ClientError;
use bincode::{deserialize, serialize};
use log::{debug, error, warn};
use shared::BrokerPacket;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub type Deliveries = mpsc::UnboundedReceiver<Delivery>;

pub trait Bus: Send {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError>;
    fn subscribe(&self, topic: &str) -> Result<(), ClientError>;
    fn unsubscribe(&self, topic: &str) -> Result<(), ClientError>;
    /// Registers the payload the broker publishes on `topic` if this
    /// connection is lost. An empty payload clears the will.
    fn set_will(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError>;
    /// Clean disconnect: subscriptions end and wills are discarded.
    fn disconnect(&self) -> Result<(), ClientError>;
}

struct PeerSlot {
    tx: mpsc::UnboundedSender<Delivery>,
    topics: HashSet<String>,
    wills: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    peers: HashMap<u64, PeerSlot>,
}

impl BrokerState {
    fn publish(&self, topic: &str, payload: &[u8]) {
        for slot in self.peers.values().filter(|s| s.topics.contains(topic)) {
            let _ = slot.tx.send(Delivery {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
    }
}

/// In-process broker. Cloning shares the same topic space.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self) -> (LocalBus, Deliveries) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.peers.insert(
            id,
            PeerSlot {
                tx,
                topics: HashSet::new(),
                wills: BTreeMap::new(),
            },
        );
        let bus = LocalBus {
            id,
            broker: self.clone(),
            connected: AtomicBool::new(true),
        };
        (bus, rx)
    }

    pub fn connection_count(&self) -> usize {
        self.state().peers.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state()
            .peers
            .values()
            .filter(|s| s.topics.contains(topic))
            .count()
    }
}

pub struct LocalBus {
    id: u64,
    broker: LocalBroker,
    connected: AtomicBool,
}

impl LocalBus {
    fn with_slot<T>(&self, f: impl FnOnce(&mut PeerSlot) -> T) -> Result<T, ClientError> {
        let mut state = self.broker.state();
        let slot = state.peers.get_mut(&self.id).ok_or(ClientError::NotConnected)?;
        Ok(f(slot))
    }
}

impl Bus for LocalBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        let state = self.broker.state();
        if !state.peers.contains_key(&self.id) {
            return Err(ClientError::NotConnected);
        }
        state.publish(topic, &payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.with_slot(|slot| {
            slot.topics.insert(topic.to_string());
        })
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.with_slot(|slot| {
            slot.topics.remove(topic);
        })
    }

    fn set_will(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        self.with_slot(|slot| {
            if payload.is_empty() {
                slot.wills.remove(topic);
            } else {
                slot.wills.insert(topic.to_string(), payload);
            }
        })
    }

    fn disconnect(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        self.broker
            .state()
            .peers
            .remove(&self.id)
            .map(|_| ())
            .ok_or(ClientError::NotConnected)
    }
}

impl Drop for LocalBus {
    /// A connection dropped without a clean disconnect is lost: its wills
    /// are published.
    fn drop(&mut self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.broker.state();
        if let Some(slot) = state.peers.remove(&self.id) {
            for (topic, payload) in slot.wills {
                debug!("Releasing will on {}", topic);
                state.publish(&topic, &payload);
            }
        }
    }
}

/// Bus connection to a UDP broker. Dropping it without [`Bus::disconnect`]
/// stops heartbeats, so the broker times the peer out and releases its
/// wills.
///
/// Outgoing packets are queued and written by a sender task, so the `Bus`
/// methods never wait on the socket.
pub struct UdpBus {
    outgoing: mpsc::UnboundedSender<BrokerPacket>,
    connected: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpBus {
    pub async fn connect(
        broker: SocketAddr,
        heartbeat: Duration,
    ) -> Result<(Self, Deliveries), ClientError> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let (tx, rx) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let receiver = Self::spawn_receiver(Arc::clone(&socket), broker, tx);
        Self::spawn_sender(socket, broker, outgoing_rx);

        let heartbeats = {
            let outgoing = outgoing.clone();
            tokio::spawn(async move {
                let mut ticks = interval(heartbeat);
                loop {
                    ticks.tick().await;
                    if outgoing.send(BrokerPacket::Heartbeat).is_err() {
                        break;
                    }
                }
            })
        };

        let bus = UdpBus {
            outgoing,
            connected: AtomicBool::new(true),
            tasks: vec![receiver, heartbeats],
        };
        Ok((bus, rx))
    }

    fn spawn_receiver(
        socket: Arc<UdpSocket>,
        broker: SocketAddr,
        tx: mpsc::UnboundedSender<Delivery>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 65536];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, from)) if from == broker => {
                        match deserialize::<BrokerPacket>(&buffer[..len]) {
                            Ok(BrokerPacket::Deliver { topic, payload }) => {
                                if tx.send(Delivery { topic, payload }).is_err() {
                                    break;
                                }
                            }
                            Ok(other) => warn!("Unexpected broker packet {:?}", other),
                            Err(_) => warn!("Failed to deserialize broker packet"),
                        }
                    }
                    Ok((_, from)) => warn!("Ignoring datagram from {}", from),
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Drains the outgoing queue. Ends after a `Disconnect` or once every
    /// sender is gone, so queued packets are flushed either way.
    fn spawn_sender(
        socket: Arc<UdpSocket>,
        broker: SocketAddr,
        mut outgoing_rx: mpsc::UnboundedReceiver<BrokerPacket>,
    ) {
        tokio::spawn(async move {
            while let Some(packet) = outgoing_rx.recv().await {
                let last = matches!(packet, BrokerPacket::Disconnect);
                match serialize(&packet) {
                    Ok(data) => {
                        if let Err(e) = socket.send_to(&data, broker).await {
                            error!("Failed to send to broker {}: {}", broker, e);
                        }
                    }
                    Err(e) => error!("Failed to serialize broker packet: {}", e),
                }
                if last {
                    break;
                }
            }
        });
    }

    fn send(&self, packet: BrokerPacket) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }
        self.outgoing.send(packet)?;
        Ok(())
    }
}

impl Bus for UdpBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        self.send(BrokerPacket::Publish {
            topic: topic.to_string(),
            payload,
        })
    }

    fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.send(BrokerPacket::Subscribe {
            topic: topic.to_string(),
        })
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.send(BrokerPacket::Unsubscribe {
            topic: topic.to_string(),
        })
    }

    fn set_will(&self, topic: &str, payload: Vec<u8>) -> Result<(), ClientError> {
        self.send(BrokerPacket::SetWill {
            topic: topic.to_string(),
            payload,
        })
    }

    fn disconnect(&self) -> Result<(), ClientError> {
        let result = self.send(BrokerPacket::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
        result
    }
}

impl Drop for UdpBus {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    async fn next_broker_packet(socket: &UdpSocket) -> (BrokerPacket, SocketAddr) {
        let mut buffer = [0u8; 2048];
        loop {
            let (len, from) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
                .await
                .expect("timed out waiting for broker packet")
                .unwrap();
            match deserialize(&buffer[..len]).unwrap() {
                BrokerPacket::Heartbeat => continue,
                packet => return (packet, from),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_and_publisher() {
        let broker = LocalBroker::new();
        let (a, mut a_rx) = broker.connect();
        let (b, mut b_rx) = broker.connect();
        let (_c, mut c_rx) = broker.connect();
        a.subscribe("lobby").unwrap();
        b.subscribe("lobby").unwrap();

        a.publish("lobby", vec![1, 2, 3]).unwrap();

        let expected = Delivery {
            topic: "lobby".into(),
            payload: vec![1, 2, 3],
        };
        assert_eq!(a_rx.try_recv().unwrap(), expected);
        assert_eq!(b_rx.try_recv().unwrap(), expected);
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = LocalBroker::new();
        let (a, mut a_rx) = broker.connect();
        a.subscribe("t").unwrap();
        a.unsubscribe("t").unwrap();
        a.publish("t", vec![9]).unwrap();
        assert!(a_rx.try_recv().is_err());
        assert_eq!(broker.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_will_published_when_dropped() {
        let broker = LocalBroker::new();
        let (a, _a_rx) = broker.connect();
        let (b, mut b_rx) = broker.connect();
        b.subscribe("room/x").unwrap();
        a.set_will("room/x", vec![42]).unwrap();

        drop(a);
        assert_eq!(b_rx.try_recv().unwrap().payload, vec![42]);
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_clean_disconnect_discards_will() {
        let broker = LocalBroker::new();
        let (a, _a_rx) = broker.connect();
        let (b, mut b_rx) = broker.connect();
        b.subscribe("lobby").unwrap();
        a.set_will("lobby", vec![1]).unwrap();

        assert_ok!(a.disconnect());
        assert_err!(a.publish("lobby", vec![2]));
        drop(a);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cleared_will_is_not_published() {
        let broker = LocalBroker::new();
        let (a, _a_rx) = broker.connect();
        let (b, mut b_rx) = broker.connect();
        b.subscribe("lobby").unwrap();
        assert_ok!(a.set_will("lobby", vec![1]));
        assert_ok!(a.set_will("lobby", Vec::new()));

        drop(a);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_udp_bus_sends_right_after_connect() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = broker.local_addr().unwrap();
        let (bus, mut deliveries) =
            assert_ok!(UdpBus::connect(addr, Duration::from_secs(60)).await);

        assert_ok!(bus.subscribe("lobby"));
        assert_ok!(bus.publish("lobby", vec![3]));
        let (packet, peer) = next_broker_packet(&broker).await;
        assert_eq!(
            packet,
            BrokerPacket::Subscribe {
                topic: "lobby".into()
            }
        );
        let (packet, _) = next_broker_packet(&broker).await;
        assert!(matches!(packet, BrokerPacket::Publish { .. }));

        let deliver = serialize(&BrokerPacket::Deliver {
            topic: "lobby".into(),
            payload: vec![7],
        })
        .unwrap();
        broker.send_to(&deliver, peer).await.unwrap();
        let delivery = timeout(Duration::from_secs(2), deliveries.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, vec![7]);

        assert_ok!(bus.disconnect());
        assert_eq!(next_broker_packet(&broker).await.0, BrokerPacket::Disconnect);
        assert_err!(bus.publish("lobby", vec![1]));
    }
}
