//! Shared error types for the NetView relay.
//!
//! Every variant is local and recoverable: it is reported where it occurs
//! and never travels back to the original caller.

use crate::ids::{ObjectId, ParticipantRef};
use thiserror::Error;

/// Top-level error type for routing, dispatch and arbitration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetViewError {
    /// No method with this name is registered on the object.
    #[error("Unknown method '{method}' on object {object}")]
    UnknownMethod {
        /// The target object.
        object: ObjectId,
        /// The requested method name.
        method: String,
    },

    /// A method with this name was already registered on the object.
    #[error("Method '{method}' already registered on object {object}")]
    DuplicateMethod {
        /// The object being populated.
        object: ObjectId,
        /// The duplicated method name.
        method: String,
    },

    /// The arguments did not match what the handler expects.
    #[error("Invalid arguments for '{method}': {reason}")]
    InvocationArgument {
        /// The method that rejected its arguments.
        method: String,
        /// What was wrong.
        reason: String,
    },

    /// The object is not (or no longer) registered on this peer.
    #[error("Object {0} is not registered on this peer")]
    AbsentObject(ObjectId),

    /// The object id is already live in the directory.
    #[error("Object {0} is already registered")]
    ObjectAlreadyRegistered(ObjectId),

    /// Authority over the object could not be transferred.
    #[error("Authority over object {object} denied to {requester}")]
    AuthorityDenied {
        /// The contested object.
        object: ObjectId,
        /// Who asked for authority.
        requester: ParticipantRef,
    },

    /// The participant's connection is gone.
    #[error("Participant {0} is no longer connected")]
    StaleParticipant(ParticipantRef),

    /// The operation can only run on the server.
    #[error("Only the server may {0}")]
    ServerOnly(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Alias for Result with NetViewError.
pub type NetViewResult<T> = Result<T, NetViewError>;

/// Failure raised by a method handler when its arguments do not fit.
///
/// The method registry wraps this into [`NetViewError::InvocationArgument`]
/// together with the method name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ArgumentError(pub String);

impl ArgumentError {
    /// Create an argument error from any message.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
