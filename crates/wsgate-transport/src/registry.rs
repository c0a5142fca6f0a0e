//! ConnectionRegistry: the authoritative set of live connections.
//!
//! Membership changes only through `register` and `unregister`. Removing
//! a record always cancels its heartbeat, so every record that leaves the
//! registry has had its timer stopped exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, warn};
use wsgate_protocol::GatewayError;

use crate::connection::{ConnectionId, ConnectionRecord};
use crate::lifecycle::ShutdownState;

/// Point-in-time counters for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub live: usize,
    pub registered_total: u64,
    pub heartbeats_cancelled_total: u64,
    pub rejected_total: u64,
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionRecord>>,
    state: Arc<ShutdownState>,
    max_connections: Option<usize>,
    /// Registrations hold this shared; a broadcast holds it exclusively, so a
    /// registration racing the start of a drain is either visited by the
    /// broadcast or observes the new phase and backs out.
    admission: RwLock<()>,
    emptied: Notify,
    registered_total: AtomicU64,
    heartbeats_cancelled_total: AtomicU64,
    rejected_total: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(state: Arc<ShutdownState>, max_connections: Option<usize>) -> Self {
        Self {
            connections: DashMap::new(),
            state,
            max_connections,
            admission: RwLock::new(()),
            emptied: Notify::new(),
            registered_total: AtomicU64::new(0),
            heartbeats_cancelled_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
        }
    }

    /// Whether a new connection would currently be accepted. Counts a
    /// rejection when it would not.
    pub fn admit(&self) -> Result<(), GatewayError> {
        if !self.state.is_running() {
            self.rejected_total.fetch_add(1, Ordering::Relaxed);
            return Err(GatewayError::ShuttingDown);
        }
        if let Some(max) = self.max_connections {
            if self.connections.len() >= max {
                self.rejected_total.fetch_add(1, Ordering::Relaxed);
                return Err(GatewayError::CapacityReached(max));
            }
        }
        Ok(())
    }

    /// Add a record. Must run before its heartbeat is started.
    pub fn register(&self, record: Arc<ConnectionRecord>) -> Result<(), GatewayError> {
        let _admission = self.admission.read();
        self.admit()?;
        self.connections.insert(record.id.clone(), record.clone());
        self.registered_total.fetch_add(1, Ordering::Relaxed);
        debug!(client_id = %record.id, live = self.connections.len(), "connection registered");
        Ok(())
    }

    /// Remove a record and cancel its heartbeat. Safe to call from racing
    /// close and error paths; only the first call finds the record.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ConnectionRecord>> {
        let (_, record) = self.connections.remove(id)?;
        if record.cancel_heartbeat() {
            self.heartbeats_cancelled_total.fetch_add(1, Ordering::Relaxed);
        }
        debug!(client_id = %id, live = self.connections.len(), "connection unregistered");
        if self.connections.is_empty() {
            self.emptied.notify_waiters();
        }
        Some(record)
    }

    /// Apply `f` to every registered connection. Serialised against
    /// in-flight registrations.
    pub fn for_each_live<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<ConnectionRecord>),
    {
        let _admission = self.admission.write();
        for entry in self.connections.iter() {
            f(entry.value());
        }
    }

    /// Force-terminate and remove every remaining connection. Returns how
    /// many were removed.
    pub fn terminate_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut terminated = 0;
        for id in ids {
            if let Some(record) = self.unregister(&id) {
                record.terminate();
                terminated += 1;
            }
        }
        if terminated > 0 {
            warn!(terminated, "force-terminated remaining connections");
        }
        terminated
    }

    /// Resolves once no connection is registered.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.connections.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.connections.len(),
            registered_total: self.registered_total.load(Ordering::Relaxed),
            heartbeats_cancelled_total: self.heartbeats_cancelled_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
        }
    }
}
