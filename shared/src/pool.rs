//! Arrival-ordered waiting pool and the formation rule shared by both
//! topologies.

use crate::{Client, ClientId, MAX_ROOM_SIZE};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub client: Client,
    pub joined_at: Instant,
}

/// What the pool wants done after it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormationTrigger {
    /// Capacity reached: form now.
    Immediate,
    /// Minimum reached: form when the grace window elapses.
    Grace,
    /// Below the minimum: no room can form.
    None,
}

/// Clients waiting for a ranked match, in arrival order. Joining is
/// idempotent per [`ClientId`].
#[derive(Debug, Clone)]
pub struct WaitingPool {
    entries: Vec<PoolEntry>,
    capacity: usize,
    min_players: usize,
}

impl WaitingPool {
    pub fn new(capacity: usize, min_players: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_ROOM_SIZE);
        Self {
            entries: Vec::new(),
            capacity,
            min_players: min_players.max(1).min(capacity),
        }
    }

    /// Adds the client unless already present. Returns the pool size.
    pub fn join(&mut self, client: Client) -> usize {
        if !self.contains(&client.id) {
            self.entries.push(PoolEntry {
                client,
                joined_at: Instant::now(),
            });
        }
        self.entries.len()
    }

    /// Removes the client if present; returns whether it was there.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.client.id != id);
        self.entries.len() != before
    }

    pub fn remove_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a ClientId>) {
        for id in ids {
            self.remove(id);
        }
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.iter().any(|e| &e.client.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.entries.iter().map(|e| &e.client)
    }

    /// How long the earliest arrival has been waiting.
    pub fn longest_wait(&self) -> Option<Duration> {
        self.entries.first().map(|e| e.joined_at.elapsed())
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.entries.iter().map(|e| e.client.id.clone()).collect()
    }

    pub fn trigger(&self) -> FormationTrigger {
        if self.entries.len() >= self.capacity {
            FormationTrigger::Immediate
        } else if self.entries.len() >= self.min_players {
            FormationTrigger::Grace
        } else {
            FormationTrigger::None
        }
    }

    /// Removes and returns up to `capacity` clients in arrival order, or
    /// nothing if fewer than `min_players` are waiting.
    pub fn take_room(&mut self) -> Option<Vec<Client>> {
        if self.entries.len() < self.min_players {
            return None;
        }
        let n = self.entries.len().min(self.capacity);
        Some(self.entries.drain(..n).map(|e| e.client).collect())
    }
}

/// Leader among the visible waiting clients: the lexicographically smallest
/// id. Every peer computes this independently over its own view.
pub fn elect_leader<'a>(ids: impl IntoIterator<Item = &'a ClientId>) -> Option<&'a ClientId> {
    ids.into_iter().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> Client {
        Client::new(ClientId::from(id), id)
    }

    #[test]
    fn test_capacity_is_bounded_by_index_range() {
        let mut pool = WaitingPool::new(1000, 2);
        for i in 0..300 {
            pool.join(client(&format!("p_{i:03}")));
        }
        assert_eq!(pool.take_room().map(|r| r.len()), Some(MAX_ROOM_SIZE));
        assert_eq!(pool.len(), 300 - MAX_ROOM_SIZE);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut pool = WaitingPool::new(4, 2);
        assert_eq!(pool.join(client("a")), 1);
        assert_eq!(pool.join(client("a")), 1);
        assert_eq!(pool.join(client("b")), 2);
        assert_eq!(pool.join(client("a")), 2);
        assert_eq!(pool.ids(), vec![ClientId::from("a"), ClientId::from("b")]);
    }

    #[test]
    fn test_trigger_thresholds() {
        let mut pool = WaitingPool::new(4, 2);
        assert_eq!(pool.trigger(), FormationTrigger::None);
        pool.join(client("a"));
        assert_eq!(pool.trigger(), FormationTrigger::None);
        pool.join(client("b"));
        assert_eq!(pool.trigger(), FormationTrigger::Grace);
        pool.join(client("c"));
        assert_eq!(pool.trigger(), FormationTrigger::Grace);
        pool.join(client("d"));
        assert_eq!(pool.trigger(), FormationTrigger::Immediate);
    }

    #[test]
    fn test_take_room_preserves_arrival_order() {
        let mut pool = WaitingPool::new(4, 2);
        for id in ["e", "d", "c", "b", "a"] {
            pool.join(client(id));
        }
        let room = pool.take_room().unwrap();
        let ids: Vec<&str> = room.iter().map(|c| c.id.0.as_str()).collect();
        assert_eq!(ids, vec!["e", "d", "c", "b"]);
        assert_eq!(pool.ids(), vec![ClientId::from("a")]);
    }

    #[test]
    fn test_take_room_below_minimum() {
        let mut pool = WaitingPool::new(4, 2);
        pool.join(client("a"));
        assert!(pool.take_room().is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_take_partial_room() {
        let mut pool = WaitingPool::new(4, 2);
        pool.join(client("a"));
        pool.join(client("b"));
        pool.join(client("c"));
        assert_eq!(pool.take_room().unwrap().len(), 3);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut pool = WaitingPool::new(4, 2);
        pool.join(client("a"));
        pool.join(client("b"));
        assert!(pool.remove(&ClientId::from("a")));
        assert!(!pool.remove(&ClientId::from("a")));
        assert_eq!(pool.len(), 1);

        pool.join(client("c"));
        pool.remove_all(&[ClientId::from("b"), ClientId::from("c")]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_elect_leader() {
        let ids = vec![
            ClientId::from("p_m"),
            ClientId::from("p_b"),
            ClientId::from("p_x"),
        ];
        assert_eq!(elect_leader(&ids), Some(&ClientId::from("p_b")));
        assert_eq!(elect_leader(&Vec::<ClientId>::new()), None);
    }
}
