//! TCP transport for the NetView wire protocol.
//!
//! A [`TcpServer`] binds a listener, authenticates each client with an
//! HMAC handshake, assigns it a connection ID and attaches it to the shared
//! [`ServerTransport`]. A [`TcpClient`] performs the other half of the
//! handshake and exposes the connection as a [`ClientTransport`].
//!
//! Every connection gets one reader task and one writer task, so messages
//! from a single peer are delivered in the order they were sent.

use crate::message::*;
use crate::transport::{
    ClientTransport, EventReceiver, EventSender, ServerTransport, TransportEvent, WireError,
};

use hmac::{Hmac, Mac};
use netview_types::config::NetConfig;
use netview_types::ids::{ConnectionId, ParticipantRef};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for message authentication.
fn hmac_sign(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify HMAC-SHA256 signature using constant-time comparison.
fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// Maximum single message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// The listening side of a TCP session.
pub struct TcpServer {
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    transport: Arc<ServerTransport>,
}

impl TcpServer {
    /// Bind `config.listen_addr` and start accepting clients.
    pub async fn start(
        config: &NetConfig,
        transport: Arc<ServerTransport>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), WireError> {
        // SECURITY: Require shared_secret before accepting anyone
        if config.shared_secret.is_empty() {
            return Err(WireError::HandshakeFailed(
                "TCP transport requires shared_secret. Set shared_secret in config.toml".into(),
            ));
        }

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "NetView: listening on {} (max {} connections)",
            local_addr, config.max_connections
        );

        let secret: Arc<str> = Arc::from(config.shared_secret.as_str());
        let accept_transport = Arc::clone(&transport);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, secret, accept_transport).await;
        });

        Ok((
            Self {
                local_addr,
                transport,
            },
            accept_handle,
        ))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The transport clients are attached to.
    pub fn transport(&self) -> &Arc<ServerTransport> {
        &self.transport
    }

    /// Internal accept loop — runs in a spawned task.
    async fn accept_loop(listener: TcpListener, secret: Arc<str>, transport: Arc<ServerTransport>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("NetView: accepted connection from {}", addr);
                    let secret = Arc::clone(&secret);
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_inbound(stream, addr, &secret, &transport).await
                        {
                            debug!("NetView: inbound connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("NetView: accept error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handle a single inbound connection: perform handshake, then pump messages.
    async fn handle_inbound(
        stream: TcpStream,
        addr: SocketAddr,
        secret: &str,
        transport: &ServerTransport,
    ) -> Result<(), WireError> {
        let (mut reader, mut writer) = stream.into_split();

        let msg = read_message(&mut reader).await?;
        let (nickname, nonce, auth_hmac) = match msg.kind {
            WireMessageKind::Request(WireRequest::Handshake {
                nickname,
                protocol_version,
                nonce,
                auth_hmac,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    write_error(
                        &mut writer,
                        &msg.id,
                        1,
                        format!(
                            "Protocol version mismatch: expected {}, got {}",
                            PROTOCOL_VERSION, protocol_version
                        ),
                    )
                    .await?;
                    return Err(WireError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                (nickname, nonce, auth_hmac)
            }
            // SECURITY: Reject all non-Handshake initial messages.
            _ => {
                warn!(
                    "NetView: rejected unauthenticated message from {} — handshake required",
                    addr
                );
                write_error(
                    &mut writer,
                    &msg.id,
                    401,
                    "Authentication required: complete HMAC handshake first".to_string(),
                )
                .await?;
                return Err(WireError::HandshakeFailed(
                    "Rejected unauthenticated request — handshake required".into(),
                ));
            }
        };

        // SECURITY: Verify the incoming HMAC
        let expected_data = format!("{}{}", nonce, nickname);
        if !hmac_verify(secret, expected_data.as_bytes(), &auth_hmac) {
            write_error(&mut writer, &msg.id, 403, "HMAC authentication failed".into()).await?;
            return Err(WireError::HandshakeFailed(
                "HMAC verification failed on incoming Handshake".into(),
            ));
        }

        let (link, outbound) = mpsc::unbounded_channel();
        let connection = match transport.attach(&nickname, Some(addr), link) {
            Ok(connection) => connection,
            Err(e) => {
                write_error(&mut writer, &msg.id, 503, e.to_string()).await?;
                return Err(e);
            }
        };

        let ack_nonce = uuid::Uuid::new_v4().to_string();
        let ack_auth_data = format!("{}{}", ack_nonce, connection);
        let ack = WireMessage {
            id: msg.id.clone(),
            kind: WireMessageKind::Response(WireResponse::HandshakeAck {
                connection_id: connection,
                protocol_version: PROTOCOL_VERSION,
                auth_hmac: hmac_sign(secret, ack_auth_data.as_bytes()),
                nonce: ack_nonce,
            }),
        };
        if let Err(e) = write_message(&mut writer, &ack).await {
            transport.detach(connection);
            return Err(e);
        }

        info!(
            "NetView: handshake with {} from {} — connection {}",
            nickname, addr, connection
        );

        tokio::spawn(writer_loop(writer, outbound));

        let result = reader_loop(
            &mut reader,
            ParticipantRef::Client(connection),
            &transport.inbound(),
        )
        .await;
        transport.detach(connection);
        result
    }
}

/// The connecting side of a TCP session.
pub struct TcpClient {
    connection: ConnectionId,
    server_addr: SocketAddr,
    transport: ClientTransport,
    events: EventReceiver,
}

impl TcpClient {
    /// Connect to `config.server_addr` and perform the handshake.
    pub async fn connect(config: &NetConfig) -> Result<Self, WireError> {
        if config.shared_secret.is_empty() {
            return Err(WireError::HandshakeFailed(
                "TCP transport requires shared_secret. Set shared_secret in config.toml".into(),
            ));
        }

        let server_addr = config.server_addr;
        info!("NetView: connecting to server at {}", server_addr);
        let stream = TcpStream::connect(server_addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        // Send our handshake with HMAC authentication
        let nonce = uuid::Uuid::new_v4().to_string();
        let auth_data = format!("{}{}", nonce, config.nickname);
        let handshake = WireMessage {
            id: uuid::Uuid::new_v4().to_string(),
            kind: WireMessageKind::Request(WireRequest::Handshake {
                nickname: config.nickname.clone(),
                protocol_version: PROTOCOL_VERSION,
                auth_hmac: hmac_sign(&config.shared_secret, auth_data.as_bytes()),
                nonce,
            }),
        };
        write_message(&mut writer, &handshake).await?;

        let response = read_message(&mut reader).await?;
        let connection = match response.kind {
            WireMessageKind::Response(WireResponse::HandshakeAck {
                connection_id,
                protocol_version,
                nonce: ack_nonce,
                auth_hmac: ack_hmac,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(WireError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                // SECURITY: Verify the ack HMAC
                let expected_data = format!("{}{}", ack_nonce, connection_id);
                if !hmac_verify(&config.shared_secret, expected_data.as_bytes(), &ack_hmac) {
                    return Err(WireError::HandshakeFailed(
                        "HMAC verification failed on HandshakeAck".into(),
                    ));
                }
                connection_id
            }
            WireMessageKind::Response(WireResponse::Error { code: 503, .. }) => {
                return Err(WireError::RoomFull {
                    max: config.max_connections,
                });
            }
            WireMessageKind::Response(WireResponse::Error { code, message }) => {
                return Err(WireError::HandshakeFailed(format!(
                    "Remote error {code}: {message}"
                )));
            }
            _ => {
                return Err(WireError::HandshakeFailed(
                    "Unexpected response to handshake".to_string(),
                ));
            }
        };

        info!(
            "NetView: joined {} as connection {}",
            server_addr, connection
        );

        let (events_tx, events) = mpsc::unbounded_channel();
        let (uplink, outbound) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(writer, outbound));
        tokio::spawn(async move {
            if let Err(e) = reader_loop(&mut reader, ParticipantRef::Server, &events_tx).await {
                debug!("NetView: connection to {} ended: {}", server_addr, e);
            }
            let _ = events_tx.send(TransportEvent::Disconnected(connection));
        });

        Ok(Self {
            connection,
            server_addr,
            transport: ClientTransport::new(connection, uplink),
            events,
        })
    }

    /// The connection ID the server assigned.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// The server this client is connected to.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Split into the transport and its inbound event stream.
    pub fn into_parts(self) -> (ClientTransport, EventReceiver) {
        (self.transport, self.events)
    }
}

/// Forward relay frames from `reader` into `events`, tagged with `from`.
async fn reader_loop(
    reader: &mut OwnedReadHalf,
    from: ParticipantRef,
    events: &EventSender,
) -> Result<(), WireError> {
    loop {
        let msg = match read_message(reader).await {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        match msg.kind {
            WireMessageKind::Relay(message) => {
                if events
                    .send(TransportEvent::Message { from, message })
                    .is_err()
                {
                    return Ok(());
                }
            }
            _ => {
                warn!(
                    "NetView: unexpected non-relay message from {}: {:?}",
                    from, msg.id
                );
            }
        }
    }
}

/// Drain an outbound link onto the socket until it closes or disconnects.
async fn writer_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = outbound.recv().await {
        match event {
            TransportEvent::Message { message, .. } => {
                if let Err(e) = write_message(&mut writer, &WireMessage::relay(message)).await {
                    debug!("NetView: write failed: {}", e);
                    break;
                }
            }
            TransportEvent::Disconnected(_) => break,
            TransportEvent::Connected { .. } => {}
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_error(
    writer: &mut OwnedWriteHalf,
    id: &str,
    code: i32,
    message: String,
) -> Result<(), WireError> {
    let err_resp = WireMessage {
        id: id.to_string(),
        kind: WireMessageKind::Response(WireResponse::Error { code, message }),
    };
    write_message(writer, &err_resp).await
}

/// Write a framed message (4-byte length + JSON) to a TCP stream.
pub async fn write_message(writer: &mut OwnedWriteHalf, msg: &WireMessage) -> Result<(), WireError> {
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON) from a TCP stream.
pub async fn read_message(reader: &mut OwnedReadHalf) -> Result<WireMessage, WireError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}
