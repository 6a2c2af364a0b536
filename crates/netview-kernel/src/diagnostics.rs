//! Diagnostics — bounded history of recoverable failures on this peer.
//!
//! Failures never travel back to the caller. They are logged where they
//! happen and kept here so operators and tests can see what was dropped.

use chrono::{DateTime, Utc};
use netview_types::error::NetViewError;
use netview_types::ids::ObjectId;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// When it was recorded.
    pub at: DateTime<Utc>,
    /// The object involved, if known.
    pub object: Option<ObjectId>,
    /// The method involved, if any.
    pub method: Option<String>,
    /// What went wrong.
    pub error: NetViewError,
}

/// Ring buffer of recent diagnostics.
pub struct Diagnostics {
    capacity: usize,
    history: Mutex<VecDeque<Diagnostic>>,
}

impl Diagnostics {
    /// Create a buffer keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Log and remember a failure.
    pub fn record(&self, object: Option<ObjectId>, method: Option<&str>, error: NetViewError) {
        warn!(
            object = ?object,
            method = method.unwrap_or("-"),
            error = %error,
            "Dropped remote call"
        );
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(Diagnostic {
            at: Utc::now(),
            object,
            method: method.map(str::to_string),
            error,
        });
    }

    /// Most recent diagnostics, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Diagnostic> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Every retained error, oldest first.
    pub fn errors(&self) -> Vec<NetViewError> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().map(|d| d.error.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
