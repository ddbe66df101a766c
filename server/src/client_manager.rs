//! Connection tracking for the UDP server
//!
//! This module keeps the server-side view of who is connected:
//! - Connection lifecycle (first datagram, explicit leave, timeout)
//! - Binding of socket addresses to the client ids announced in join requests
//! - Connection health monitoring and automatic cleanup
//! - Capacity enforcement
//!
//! Both the arbiter and the broker use it; only the arbiter binds ids.

use log::info;
use shared::ClientId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A remote endpoint that has sent us at least one datagram
#[derive(Debug, Clone)]
pub struct Connection {
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Client id announced by this endpoint, once it asked to join
    pub client_id: Option<ClientId>,
    /// Last time we received any datagram from this endpoint
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            client_id: None,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if nothing arrived from this endpoint within `timeout`,
    /// which we treat as a disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected endpoints and their client ids
///
/// Ids are bound one-to-one to addresses: binding an id that is already
/// bound elsewhere moves it, which is how a client reconnecting from a new
/// port keeps its identity.
pub struct ClientManager {
    connections: HashMap<SocketAddr, Connection>,
    by_id: HashMap<ClientId, SocketAddr>,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            by_id: HashMap::new(),
            max_clients,
            timeout,
        }
    }

    /// Records activity from `addr`, registering it if new.
    ///
    /// Returns false if the endpoint is unknown and the server is full.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        if let Some(connection) = self.connections.get_mut(&addr) {
            connection.last_seen = Instant::now();
            return true;
        }
        if self.connections.len() >= self.max_clients {
            return false;
        }
        info!("Endpoint {} connected", addr);
        self.connections.insert(addr, Connection::new(addr));
        true
    }

    /// Binds `client_id` to `addr` (which must have been touched).
    ///
    /// Returns the id previously bound to `addr`, if it was a different one.
    pub fn bind(&mut self, addr: SocketAddr, client_id: ClientId) -> Option<ClientId> {
        if !self.connections.contains_key(&addr) {
            return None;
        }
        if let Some(old_addr) = self.by_id.get(&client_id).copied() {
            if old_addr != addr {
                info!("Client {} moved from {} to {}", client_id, old_addr, addr);
                self.connections.remove(&old_addr);
            }
        }

        let connection = self.connections.get_mut(&addr)?;
        let previous = connection.client_id.replace(client_id.clone());
        if let Some(previous) = &previous {
            self.by_id.remove(previous);
        }
        self.by_id.insert(client_id.clone(), addr);
        previous.filter(|p| p != &client_id)
    }

    pub fn client_at(&self, addr: SocketAddr) -> Option<&ClientId> {
        self.connections
            .get(&addr)
            .and_then(|c| c.client_id.as_ref())
    }

    pub fn addr_of(&self, client_id: &ClientId) -> Option<SocketAddr> {
        self.by_id.get(client_id).copied()
    }

    /// Removes an endpoint; returns its connection if it was known.
    pub fn remove(&mut self, addr: SocketAddr) -> Option<Connection> {
        let connection = self.connections.remove(&addr)?;
        if let Some(id) = &connection.client_id {
            self.by_id.remove(id);
        }
        info!("Endpoint {} disconnected", addr);
        Some(connection)
    }

    /// Removes and returns every endpoint silent for longer than the timeout.
    pub fn check_timeouts(&mut self) -> Vec<Connection> {
        let timed_out: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(self.timeout))
            .map(|c| c.addr)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|addr| self.remove(addr))
            .collect()
    }

    /// Returns the number of known endpoints
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no endpoints are known
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn manager(max_clients: usize) -> ClientManager {
        ClientManager::new(max_clients, Duration::from_secs(5))
    }

    #[test]
    fn test_connection_timeout() {
        let mut connection = Connection::new(test_addr());
        assert!(!connection.is_timed_out(Duration::from_secs(1)));

        connection.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(connection.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_touch_registers_once() {
        let mut manager = manager(2);
        assert!(manager.is_empty());
        assert!(manager.touch(test_addr()));
        assert!(manager.touch(test_addr()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut manager = manager(1);
        assert!(manager.touch(test_addr()));
        assert!(!manager.touch(test_addr2()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_bind_and_lookup() {
        let mut manager = manager(4);
        manager.touch(test_addr());
        let id = ClientId::from("p_one");

        assert_eq!(manager.bind(test_addr(), id.clone()), None);
        assert_eq!(manager.client_at(test_addr()), Some(&id));
        assert_eq!(manager.addr_of(&id), Some(test_addr()));

        // Re-binding the same id is a no-op.
        assert_eq!(manager.bind(test_addr(), id.clone()), None);
    }

    #[test]
    fn test_bind_replaces_previous_id() {
        let mut manager = manager(4);
        manager.touch(test_addr());
        manager.bind(test_addr(), ClientId::from("p_old"));
        let previous = manager.bind(test_addr(), ClientId::from("p_new"));

        assert_eq!(previous, Some(ClientId::from("p_old")));
        assert_eq!(manager.addr_of(&ClientId::from("p_old")), None);
    }

    #[test]
    fn test_bind_moves_id_to_new_addr() {
        let mut manager = manager(4);
        let id = ClientId::from("p_roamer");
        manager.touch(test_addr());
        manager.bind(test_addr(), id.clone());

        manager.touch(test_addr2());
        manager.bind(test_addr2(), id.clone());

        assert_eq!(manager.addr_of(&id), Some(test_addr2()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_bind_unknown_addr() {
        let mut manager = manager(4);
        assert_eq!(manager.bind(test_addr(), ClientId::from("p_x")), None);
        assert_eq!(manager.addr_of(&ClientId::from("p_x")), None);
    }

    #[test]
    fn test_remove() {
        let mut manager = manager(2);
        manager.touch(test_addr());
        manager.bind(test_addr(), ClientId::from("p_a"));

        let removed = manager.remove(test_addr()).unwrap();
        assert_eq!(removed.client_id, Some(ClientId::from("p_a")));
        assert!(manager.remove(test_addr()).is_none());
        assert_eq!(manager.addr_of(&ClientId::from("p_a")), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = ClientManager::new(4, Duration::from_millis(50));
        manager.touch(test_addr());
        manager.touch(test_addr2());
        manager.bind(test_addr(), ClientId::from("p_quiet"));

        manager
            .connections
            .get_mut(&test_addr())
            .unwrap()
            .last_seen = Instant::now() - Duration::from_secs(1);

        let timed_out = manager.check_timeouts();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].client_id, Some(ClientId::from("p_quiet")));
        assert_eq!(manager.len(), 1);
    }
}
