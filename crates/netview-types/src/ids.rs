//! Identifiers for networked objects and the participants that act on them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique identifier of a networked object, valid from spawn to despawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the server assigns to a client connection during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant in a session: the server itself or one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRef {
    /// The authoritative server.
    Server,
    /// A client, addressed by its connection.
    Client(ConnectionId),
}

impl ParticipantRef {
    /// Whether this participant is the server.
    pub fn is_server(&self) -> bool {
        matches!(self, ParticipantRef::Server)
    }

    /// The client connection behind this participant, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            ParticipantRef::Server => None,
            ParticipantRef::Client(id) => Some(*id),
        }
    }
}

impl fmt::Display for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantRef::Server => write!(f, "server"),
            ParticipantRef::Client(id) => write!(f, "client:{id}"),
        }
    }
}

/// Who currently holds authority over an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Initial state for every object.
    #[default]
    ServerAuthority,
    /// A client connection was granted authority.
    Client(ConnectionId),
}

impl Owner {
    /// Whether `participant` is the holder of this authority.
    pub fn is_held_by(&self, participant: ParticipantRef) -> bool {
        match (self, participant) {
            (Owner::ServerAuthority, ParticipantRef::Server) => true,
            (Owner::Client(owner), ParticipantRef::Client(id)) => *owner == id,
            _ => false,
        }
    }
}

impl From<ParticipantRef> for Owner {
    fn from(participant: ParticipantRef) -> Self {
        match participant {
            ParticipantRef::Server => Owner::ServerAuthority,
            ParticipantRef::Client(id) => Owner::Client(id),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::ServerAuthority => write!(f, "server-authority"),
            Owner::Client(id) => write!(f, "client:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_serialization() {
        let json = serde_json::to_string(&ParticipantRef::Client(ConnectionId(3))).unwrap();
        assert_eq!(json, r#"{"client":3}"#);
        let server = serde_json::to_string(&ParticipantRef::Server).unwrap();
        assert_eq!(server, r#""server""#);
        let back: ParticipantRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.connection(), Some(ConnectionId(3)));
    }

    #[test]
    fn test_owner_held_by() {
        let owner = Owner::Client(ConnectionId(4));
        assert!(owner.is_held_by(ParticipantRef::Client(ConnectionId(4))));
        assert!(!owner.is_held_by(ParticipantRef::Client(ConnectionId(5))));
        assert!(!owner.is_held_by(ParticipantRef::Server));
        assert!(Owner::default().is_held_by(ParticipantRef::Server));
    }

    #[test]
    fn test_owner_from_participant() {
        assert_eq!(Owner::from(ParticipantRef::Server), Owner::ServerAuthority);
        assert_eq!(
            Owner::from(ParticipantRef::Client(ConnectionId(9))),
            Owner::Client(ConnectionId(9))
        );
    }
}
