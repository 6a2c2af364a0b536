//! Wire protocol message types.
//!
//! All communication between the server and its clients uses JSON-framed
//! messages over a reliable ordered stream. Each message is prefixed with a
//! 4-byte big-endian length header.

use netview_types::args::RpcArgs;
use netview_types::ids::{ConnectionId, ObjectId, Owner, ParticipantRef};
use netview_types::policy::DeliveryPolicy;
use serde::{Deserialize, Serialize};

/// A wire protocol message (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Unique message ID.
    pub id: String,
    /// Message variant.
    #[serde(flatten)]
    pub kind: WireMessageKind,
}

impl WireMessage {
    /// Wrap a relay message with a fresh message ID.
    pub fn relay(message: RelayMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: WireMessageKind::Relay(message),
        }
    }
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessageKind {
    /// Connection setup request from a client.
    #[serde(rename = "request")]
    Request(WireRequest),
    /// Server answer to a setup request.
    #[serde(rename = "response")]
    Response(WireResponse),
    /// Fire-and-forget relay traffic, only valid after the handshake.
    #[serde(rename = "relay")]
    Relay(RelayMessage),
}

/// Request messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireRequest {
    /// Handshake: introduce the client and prove knowledge of the shared secret.
    #[serde(rename = "handshake")]
    Handshake {
        /// Human-readable player name.
        nickname: String,
        /// Protocol version.
        protocol_version: u32,
        /// Random nonce for HMAC authentication.
        #[serde(default)]
        nonce: String,
        /// HMAC-SHA256(shared_secret, nonce + nickname).
        #[serde(default)]
        auth_hmac: String,
    },
}

/// Response messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireResponse {
    /// Handshake acknowledgement carrying the assigned connection.
    #[serde(rename = "handshake_ack")]
    HandshakeAck {
        /// Connection ID the server assigned to this client.
        connection_id: ConnectionId,
        protocol_version: u32,
        /// Random nonce for HMAC authentication.
        #[serde(default)]
        nonce: String,
        /// HMAC-SHA256(shared_secret, nonce + connection_id).
        #[serde(default)]
        auth_hmac: String,
    },
    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

/// A remote call travelling from the caller, through the server, to its recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub object_id: ObjectId,
    pub method: String,
    pub args: RpcArgs,
    /// Who issued the call. The server overwrites this with the sending
    /// connection before relaying.
    pub original_caller: ParticipantRef,
    pub policy: DeliveryPolicy,
}

/// Result of an ownership arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TransferOutcome {
    #[serde(rename = "granted")]
    Granted { new_owner: Owner },
    #[serde(rename = "denied")]
    Denied { reason: String },
}

/// Relay traffic exchanged once a connection is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum RelayMessage {
    /// A remote call.
    #[serde(rename = "call")]
    Call(CallEnvelope),
    /// A client asks the server for authority over an object.
    #[serde(rename = "ownership_request")]
    OwnershipTransferRequest {
        object_id: ObjectId,
        requester: ParticipantRef,
    },
    /// The server's answer to the requester.
    #[serde(rename = "ownership_result")]
    OwnershipTransferResult {
        object_id: ObjectId,
        outcome: TransferOutcome,
    },
    /// The server announces a new owner to everyone else.
    #[serde(rename = "ownership_changed")]
    OwnershipChanged { object_id: ObjectId, owner: Owner },
}

impl RelayMessage {
    /// The object this message concerns.
    pub fn object_id(&self) -> ObjectId {
        match self {
            RelayMessage::Call(envelope) => envelope.object_id,
            RelayMessage::OwnershipTransferRequest { object_id, .. }
            | RelayMessage::OwnershipTransferResult { object_id, .. }
            | RelayMessage::OwnershipChanged { object_id, .. } => *object_id,
        }
    }
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}
