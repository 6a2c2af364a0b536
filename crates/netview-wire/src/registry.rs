//! Connection registry — tracks client connections and their nicknames.
//!
//! The [`ConnectionRegistry`] is a thread-safe record of every client the
//! server has admitted, its connection state, and the player name it
//! announced during the handshake. It also allocates connection IDs.

use chrono::{DateTime, Utc};
use netview_types::ids::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake completed, fully connected.
    Connected,
    /// Connection lost. The entry is kept so late lookups can tell stale from unknown.
    Disconnected,
}

/// An entry representing a single client connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// Connection ID assigned at admission.
    pub connection_id: ConnectionId,
    /// Player name announced in the handshake.
    pub nickname: String,
    /// Remote address, when the transport has one.
    pub address: Option<SocketAddr>,
    /// Connection state.
    pub state: ConnectionState,
    /// When the client was admitted.
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe registry of client connections.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionEntry>>>,
    next_id: Arc<AtomicU32>,
}

impl ConnectionRegistry {
    /// Create a new empty registry. Connection IDs start at 1.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Admit a client if fewer than `max_connections` are connected.
    ///
    /// Returns the freshly allocated connection ID, or `None` when full.
    pub fn admit(
        &self,
        nickname: &str,
        address: Option<SocketAddr>,
        max_connections: usize,
    ) -> Option<ConnectionId> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        let live = connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count();
        if live >= max_connections {
            return None;
        }
        let connection_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        connections.insert(
            connection_id,
            ConnectionEntry {
                connection_id,
                nickname: nickname.to_string(),
                address,
                state: ConnectionState::Connected,
                connected_at: Utc::now(),
            },
        );
        Some(connection_id)
    }

    /// Mark a connection as disconnected.
    ///
    /// Returns `true` only for the call that actually changed the state.
    pub fn mark_disconnected(&self, connection: ConnectionId) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        match connections.get_mut(&connection) {
            Some(entry) if entry.state == ConnectionState::Connected => {
                entry.state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Remove a connection entirely.
    pub fn remove(&self, connection: ConnectionId) -> Option<ConnectionEntry> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        connections.remove(&connection)
    }

    /// Get a snapshot of a specific connection.
    pub fn get(&self, connection: ConnectionId) -> Option<ConnectionEntry> {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections.get(&connection).cloned()
    }

    /// Whether the connection is live.
    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.get(connection)
            .map(|c| c.state == ConnectionState::Connected)
            .unwrap_or(false)
    }

    /// All connected clients, ordered by connection ID.
    pub fn connected(&self) -> Vec<ConnectionEntry> {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        let mut live: Vec<ConnectionEntry> = connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .cloned()
            .collect();
        live.sort_by_key(|c| c.connection_id);
        live
    }

    /// Number of connected clients.
    pub fn connected_count(&self) -> usize {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    /// Total number of entries (including disconnected).
    pub fn total_count(&self) -> usize {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_and_get() {
        let registry = ConnectionRegistry::new();
        let id = registry.admit("alice", None, 4).unwrap();
        assert_eq!(id, ConnectionId(1));

        let entry = registry.get(id).unwrap();
        assert_eq!(entry.nickname, "alice");
        assert_eq!(entry.state, ConnectionState::Connected);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let registry = ConnectionRegistry::new();
        let a = registry.admit("a", None, 4).unwrap();
        registry.mark_disconnected(a);
        let b = registry.admit("b", None, 4).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_capacity_counts_live_only() {
        let registry = ConnectionRegistry::new();
        let a = registry.admit("a", None, 1).unwrap();
        assert!(registry.admit("b", None, 1).is_none());

        registry.mark_disconnected(a);
        assert!(registry.admit("b", None, 1).is_some());
    }

    #[test]
    fn test_mark_disconnected_once() {
        let registry = ConnectionRegistry::new();
        let id = registry.admit("a", None, 4).unwrap();
        assert_eq!(registry.connected_count(), 1);

        assert!(registry.mark_disconnected(id));
        assert!(!registry.mark_disconnected(id));
        assert!(!registry.is_connected(id));
        assert_eq!(registry.connected_count(), 0);
        assert_eq!(registry.total_count(), 1);
    }

    #[test]
    fn test_connected_is_sorted() {
        let registry = ConnectionRegistry::new();
        registry.admit("a", None, 4);
        registry.admit("b", None, 4);
        registry.admit("c", None, 4);
        let names: Vec<String> = registry.connected().into_iter().map(|c| c.nickname).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
