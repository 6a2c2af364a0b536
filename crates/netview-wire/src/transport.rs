//! The transport boundary the kernel routes through.
//!
//! A [`Transport`] offers reliable ordered delivery to one participant and
//! fan-out to every client. Inbound traffic arrives as [`TransportEvent`]s on
//! an unbounded channel, in per-connection order; a connection's
//! `Disconnected` event always follows its last message.

use crate::message::RelayMessage;
use crate::registry::ConnectionRegistry;
use dashmap::DashMap;
use netview_types::ids::{ConnectionId, ParticipantRef};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Room is full ({max} connections)")]
    RoomFull { max: usize },
    #[error("No live connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("{from} cannot address {to} directly")]
    NotRoutable {
        from: ParticipantRef,
        to: ParticipantRef,
    },
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A client completed its handshake.
    Connected {
        connection: ConnectionId,
        nickname: String,
    },
    /// A relay message arrived from `from`.
    Message {
        from: ParticipantRef,
        message: RelayMessage,
    },
    /// The connection is gone. Nothing more will arrive from it.
    Disconnected(ConnectionId),
}

/// Sending half of an event stream.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
/// Receiving half of an event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Reliable ordered messaging between the server and its clients.
///
/// Sends never block: they enqueue and return. Failures are reported to the
/// caller but there is no acknowledgement from the remote side.
pub trait Transport: Send + Sync + 'static {
    /// The participant this endpoint represents.
    fn local(&self) -> ParticipantRef;

    /// Deliver one message to `to`.
    fn send(&self, to: ParticipantRef, message: RelayMessage) -> Result<(), WireError>;

    /// Deliver one message to every connected client except `exclude`.
    ///
    /// Returns the connections that could not be reached.
    fn broadcast(
        &self,
        message: RelayMessage,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, WireError)>;

    /// Whether `connection` is currently live.
    fn is_connected(&self, connection: ConnectionId) -> bool;

    /// All live connections, in ascending order.
    fn connections(&self) -> Vec<ConnectionId>;

    /// Hang up. A client drops its uplink; the server detaches every client.
    fn close(&self);
}

/// Server side of the transport: one outbound link per client connection.
///
/// Both the TCP listener and the loopback hub attach their connections here,
/// so the kernel sees a single fan-out surface.
pub struct ServerTransport {
    registry: ConnectionRegistry,
    links: DashMap<ConnectionId, EventSender>,
    inbound: EventSender,
    max_connections: usize,
}

impl ServerTransport {
    /// Create a server transport and the receiver for its inbound events.
    pub fn new(registry: ConnectionRegistry, max_connections: usize) -> (Self, EventReceiver) {
        let (inbound, events) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                links: DashMap::new(),
                inbound,
                max_connections,
            },
            events,
        )
    }

    /// The registry of client connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sender that connection readers push inbound events into.
    pub fn inbound(&self) -> EventSender {
        self.inbound.clone()
    }

    /// Admit a new client whose outbound traffic goes to `link`.
    pub fn attach(
        &self,
        nickname: &str,
        address: Option<SocketAddr>,
        link: EventSender,
    ) -> Result<ConnectionId, WireError> {
        let connection = self
            .registry
            .admit(nickname, address, self.max_connections)
            .ok_or(WireError::RoomFull {
                max: self.max_connections,
            })?;
        self.links.insert(connection, link);
        info!(connection = %connection, nickname, "Client connected");
        let _ = self.inbound.send(TransportEvent::Connected {
            connection,
            nickname: nickname.to_string(),
        });
        Ok(connection)
    }

    /// Tear down a connection. Safe to call more than once.
    ///
    /// The `Disconnected` event is queued behind every message the
    /// connection already delivered, and only on the first call.
    pub fn detach(&self, connection: ConnectionId) {
        if let Some((_, link)) = self.links.remove(&connection) {
            let _ = link.send(TransportEvent::Disconnected(connection));
        }
        if self.registry.mark_disconnected(connection) {
            info!(connection = %connection, "Client disconnected");
            let _ = self.inbound.send(TransportEvent::Disconnected(connection));
        }
    }
}

impl Transport for ServerTransport {
    fn local(&self) -> ParticipantRef {
        ParticipantRef::Server
    }

    fn send(&self, to: ParticipantRef, message: RelayMessage) -> Result<(), WireError> {
        let connection = match to {
            ParticipantRef::Client(id) => id,
            ParticipantRef::Server => {
                return Err(WireError::NotRoutable {
                    from: ParticipantRef::Server,
                    to,
                })
            }
        };
        let link = self
            .links
            .get(&connection)
            .ok_or(WireError::UnknownConnection(connection))?;
        link.send(TransportEvent::Message {
            from: ParticipantRef::Server,
            message,
        })
        .map_err(|_| WireError::ConnectionClosed)
    }

    fn broadcast(
        &self,
        message: RelayMessage,
        exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, WireError)> {
        let mut errors = Vec::new();
        for connection in self.connections() {
            if Some(connection) == exclude {
                continue;
            }
            if let Err(e) = self.send(ParticipantRef::Client(connection), message.clone()) {
                errors.push((connection, e));
            }
        }
        errors
    }

    fn is_connected(&self, connection: ConnectionId) -> bool {
        self.links.contains_key(&connection)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.links.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    fn close(&self) {
        let connections = self.connections();
        info!(clients = connections.len(), "Closing server transport");
        for connection in connections {
            self.detach(connection);
        }
    }
}

/// Where a client's outbound traffic goes.
enum Uplink {
    /// A socket writer task. A `Disconnected` event tells it to hang up.
    Stream { sender: EventSender, open: AtomicBool },
    /// Straight into an in-process server; live while the server keeps the link.
    Loopback(Arc<ServerTransport>),
}

/// Client side of the transport: a single uplink to the server.
pub struct ClientTransport {
    connection: ConnectionId,
    uplink: Uplink,
}

impl ClientTransport {
    /// Wrap an established uplink for the given connection.
    pub fn new(connection: ConnectionId, uplink: EventSender) -> Self {
        Self {
            connection,
            uplink: Uplink::Stream {
                sender: uplink,
                open: AtomicBool::new(true),
            },
        }
    }

    /// A client linked directly to an in-process server.
    pub(crate) fn loopback(connection: ConnectionId, server: Arc<ServerTransport>) -> Self {
        Self {
            connection,
            uplink: Uplink::Loopback(server),
        }
    }

    fn uplink_open(&self) -> bool {
        match &self.uplink {
            Uplink::Stream { sender, open } => open.load(Ordering::SeqCst) && !sender.is_closed(),
            Uplink::Loopback(server) => server.is_connected(self.connection),
        }
    }

    /// The connection ID the server assigned.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl Transport for ClientTransport {
    fn local(&self) -> ParticipantRef {
        ParticipantRef::Client(self.connection)
    }

    fn send(&self, to: ParticipantRef, message: RelayMessage) -> Result<(), WireError> {
        if !to.is_server() {
            return Err(WireError::NotRoutable {
                from: self.local(),
                to,
            });
        }
        if !self.uplink_open() {
            return Err(WireError::ConnectionClosed);
        }
        let event = TransportEvent::Message {
            from: self.local(),
            message,
        };
        let sent = match &self.uplink {
            Uplink::Stream { sender, .. } => sender.send(event),
            Uplink::Loopback(server) => server.inbound.send(event),
        };
        sent.map_err(|_| WireError::ConnectionClosed)
    }

    fn broadcast(
        &self,
        message: RelayMessage,
        _exclude: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, WireError)> {
        warn!(
            connection = %self.connection,
            object = %message.object_id(),
            "Clients cannot broadcast; message dropped"
        );
        Vec::new()
    }

    fn is_connected(&self, connection: ConnectionId) -> bool {
        connection == self.connection && self.uplink_open()
    }

    fn connections(&self) -> Vec<ConnectionId> {
        if self.uplink_open() {
            vec![self.connection]
        } else {
            debug!(connection = %self.connection, "Uplink closed");
            Vec::new()
        }
    }

    fn close(&self) {
        match &self.uplink {
            Uplink::Stream { sender, open } => {
                if open.swap(false, Ordering::SeqCst) {
                    info!(connection = %self.connection, "Closing uplink");
                    let _ = sender.send(TransportEvent::Disconnected(self.connection));
                }
            }
            Uplink::Loopback(server) => server.detach(self.connection),
        }
    }
}
