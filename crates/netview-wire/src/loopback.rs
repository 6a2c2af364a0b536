//! In-process transport: a server and its clients joined by channels.
//!
//! Used for offline play and for exercising full topologies in tests
//! without sockets. Delivery is synchronous with respect to the sender, so
//! draining each endpoint's event receiver in turn is deterministic.

use crate::registry::ConnectionRegistry;
use crate::transport::{ClientTransport, EventReceiver, ServerTransport, WireError};
use netview_types::ids::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A loopback "network" owning the server side of every link.
pub struct LoopbackHub {
    server: Arc<ServerTransport>,
}

impl LoopbackHub {
    /// Create a hub and the server's inbound event receiver.
    pub fn new(max_connections: usize) -> (Self, EventReceiver) {
        let (server, events) = ServerTransport::new(ConnectionRegistry::new(), max_connections);
        (
            Self {
                server: Arc::new(server),
            },
            events,
        )
    }

    /// The server endpoint.
    pub fn server(&self) -> Arc<ServerTransport> {
        Arc::clone(&self.server)
    }

    /// Connect a new client; returns its transport and inbound event receiver.
    ///
    /// The client's uplink closes as soon as the hub drops its connection.
    pub fn connect(&self, nickname: &str) -> Result<(ClientTransport, EventReceiver), WireError> {
        let (link, events) = mpsc::unbounded_channel();
        let connection = self.server.attach(nickname, None, link)?;
        Ok((
            ClientTransport::loopback(connection, Arc::clone(&self.server)),
            events,
        ))
    }

    /// Drop a client's connection.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.server.detach(connection);
    }
}
