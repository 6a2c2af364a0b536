//! Argument payloads carried by remote calls.
//!
//! Arguments travel as a list of JSON values. Handlers pull typed values out
//! with [`RpcArgs::get`]; a missing or mistyped argument becomes an
//! [`ArgumentError`] instead of a panic.

use crate::error::{ArgumentError, NetViewError, NetViewResult};
use crate::ids::ParticipantRef;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Positional arguments of a remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcArgs(Vec<serde_json::Value>);

impl RpcArgs {
    /// An empty argument list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a serializable value.
    pub fn with<T: Serialize>(mut self, value: T) -> NetViewResult<Self> {
        let value =
            serde_json::to_value(value).map_err(|e| NetViewError::Serialization(e.to_string()))?;
        self.0.push(value);
        Ok(self)
    }

    /// Append the caller's identity as the last argument.
    pub fn push_caller(&mut self, caller: ParticipantRef) {
        // ParticipantRef is a plain enum of integers; this cannot fail.
        if let Ok(value) = serde_json::to_value(caller) {
            self.0.push(value);
        }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument values.
    pub fn values(&self) -> &[serde_json::Value] {
        &self.0
    }

    /// Fail unless exactly `expected` arguments are present.
    pub fn expect_len(&self, expected: usize) -> Result<(), ArgumentError> {
        if self.0.len() == expected {
            Ok(())
        } else {
            Err(ArgumentError::new(format!(
                "expected {expected} arguments, got {}",
                self.0.len()
            )))
        }
    }

    /// Decode the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgumentError> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| ArgumentError::new(format!("missing argument {index}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ArgumentError::new(format!("argument {index}: {e}")))
    }

    /// Decode the caller identity appended as the last argument.
    pub fn caller(&self) -> Result<ParticipantRef, ArgumentError> {
        match self.0.len() {
            0 => Err(ArgumentError::new("no caller identity argument")),
            n => self.get(n - 1),
        }
    }
}

impl From<Vec<serde_json::Value>> for RpcArgs {
    fn from(values: Vec<serde_json::Value>) -> Self {
        Self(values)
    }
}
