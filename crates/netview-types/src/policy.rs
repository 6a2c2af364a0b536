//! Delivery policies for remote calls.

use crate::ids::ParticipantRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which participants perform final dispatch of a call.
///
/// Every policy is relayed through the server; clients never address each
/// other directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Only the server's copy of the object dispatches.
    ToAuthority,
    /// Every connected client except the original caller. The server does not dispatch.
    ToOthersExceptCaller,
    /// Every connected client, including the caller, and the server.
    ToAll,
    /// Exactly one participant.
    ToParticipant(ParticipantRef),
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryPolicy::ToAuthority => write!(f, "to-authority"),
            DeliveryPolicy::ToOthersExceptCaller => write!(f, "to-others"),
            DeliveryPolicy::ToAll => write!(f, "to-all"),
            DeliveryPolicy::ToParticipant(p) => write!(f, "to-participant({p})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ConnectionId;

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_string(&DeliveryPolicy::ToAll).unwrap();
        assert_eq!(json, r#""to_all""#);

        let target = DeliveryPolicy::ToParticipant(ParticipantRef::Client(ConnectionId(2)));
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, r#"{"to_participant":{"client":2}}"#);
        let back: DeliveryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }
}
