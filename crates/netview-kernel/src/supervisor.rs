//! Runtime supervision — graceful shutdown and handler panic accounting.

use dashmap::DashMap;
use netview_types::ids::ObjectId;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown signal manager with panic tracking for object domains.
pub struct Supervisor {
    /// Send side of the shutdown signal.
    shutdown_tx: watch::Sender<bool>,
    /// Receive side of the shutdown signal (clonable).
    shutdown_rx: watch::Receiver<bool>,
    /// Total handler panics caught across all objects.
    panic_count: AtomicU64,
    /// Per-object panic counts.
    object_panics: DashMap<ObjectId, u32>,
}

impl Supervisor {
    /// Create a new supervisor.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown_tx: tx,
            shutdown_rx: rx,
            panic_count: AtomicU64::new(0),
            object_panics: DashMap::new(),
        }
    }

    /// Get a receiver that will be notified on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Trigger a graceful shutdown.
    pub fn shutdown(&self) {
        info!("Supervisor: initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Record that a handler on `object` panicked. The domain keeps running.
    pub fn record_panic(&self, object: ObjectId) {
        self.panic_count.fetch_add(1, Ordering::Relaxed);
        let mut count = self.object_panics.entry(object).or_insert(0);
        *count += 1;
        warn!(
            object = %object,
            object_panics = *count,
            total_panics = self.panic_count.load(Ordering::Relaxed),
            "Handler panic recorded"
        );
    }

    /// Get the total number of panics caught.
    pub fn panic_count(&self) -> u64 {
        self.panic_count.load(Ordering::Relaxed)
    }

    /// Get the panic count for a specific object.
    pub fn object_panic_count(&self, object: ObjectId) -> u32 {
        self.object_panics.get(&object).map(|r| *r).unwrap_or(0)
    }

    /// Get a health summary.
    pub fn health(&self) -> SupervisorHealth {
        SupervisorHealth {
            is_shutting_down: self.is_shutting_down(),
            panic_count: self.panic_count(),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Health report from the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHealth {
    pub is_shutting_down: bool,
    pub panic_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown() {
        let supervisor = Supervisor::new();
        assert!(!supervisor.is_shutting_down());
        supervisor.shutdown();
        assert!(supervisor.is_shutting_down());
    }

    #[test]
    fn test_subscribe() {
        let supervisor = Supervisor::new();
        let rx = supervisor.subscribe();
        assert!(!*rx.borrow());
        supervisor.shutdown();
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_panic_tracking() {
        let supervisor = Supervisor::new();
        assert_eq!(supervisor.panic_count(), 0);
        supervisor.record_panic(ObjectId(1));
        supervisor.record_panic(ObjectId(1));
        supervisor.record_panic(ObjectId(2));
        assert_eq!(supervisor.panic_count(), 3);
        assert_eq!(supervisor.object_panic_count(ObjectId(1)), 2);
        assert_eq!(supervisor.object_panic_count(ObjectId(9)), 0);
    }

    #[test]
    fn test_health() {
        let supervisor = Supervisor::new();
        let health = supervisor.health();
        assert!(!health.is_shutting_down);
        assert_eq!(health.panic_count, 0);
    }
}
