//! Per-connection state: liveness flag, heartbeat ownership, close signals.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::HeartbeatHandle;

/// Opaque identifier assigned to a connection at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
enum HeartbeatSlot {
    /// Registered, heartbeat not started yet.
    Pending,
    Active(HeartbeatHandle),
    /// Cancelled; a heartbeat attached later is stopped on arrival.
    Released,
}

/// A live gateway connection.
///
/// The record owns its heartbeat. `cancel_heartbeat` stops it and reports
/// `true` exactly once no matter how many close paths race to call it.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub connected_at: Instant,
    is_alive: AtomicBool,
    heartbeat: Mutex<HeartbeatSlot>,
    close_requested: CancellationToken,
    terminated: CancellationToken,
}

impl ConnectionRecord {
    pub fn new() -> Self {
        Self::with_id(ConnectionId::new())
    }

    pub fn with_id(id: ConnectionId) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            heartbeat: Mutex::new(HeartbeatSlot::Pending),
            close_requested: CancellationToken::new(),
            terminated: CancellationToken::new(),
        }
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// A transport-level pong arrived.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::SeqCst)
    }

    /// Read the liveness flag and clear it for the next probe cycle.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::SeqCst)
    }

    // ── Heartbeat ownership ──────────────────────────────────────────────

    /// Hand the running heartbeat to this record. Returns `false` (and stops
    /// the heartbeat) if the record was already released or already has one.
    pub fn attach_heartbeat(&self, handle: HeartbeatHandle) -> bool {
        let mut slot = self.heartbeat.lock();
        if matches!(*slot, HeartbeatSlot::Pending) {
            *slot = HeartbeatSlot::Active(handle);
            true
        } else {
            handle.cancel();
            false
        }
    }

    /// Stop the heartbeat. `true` only for the call that actually released it.
    pub fn cancel_heartbeat(&self) -> bool {
        let previous = std::mem::replace(&mut *self.heartbeat.lock(), HeartbeatSlot::Released);
        match previous {
            HeartbeatSlot::Active(handle) => {
                handle.cancel();
                true
            }
            HeartbeatSlot::Pending => true,
            HeartbeatSlot::Released => false,
        }
    }

    pub fn heartbeat_released(&self) -> bool {
        matches!(*self.heartbeat.lock(), HeartbeatSlot::Released)
    }

    // ── Close signals ────────────────────────────────────────────────────

    /// Ask the connection to close gracefully (close frame, then wait for the peer).
    pub fn request_close(&self) {
        self.close_requested.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.is_cancelled()
    }

    pub async fn close_requested(&self) {
        self.close_requested.cancelled().await;
    }

    /// Drop the transport without a close handshake. One-way and safe to
    /// repeat.
    pub fn terminate(&self) {
        self.terminated.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    pub async fn terminated(&self) {
        self.terminated.cancelled().await;
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::{HeartbeatConfig, spawn_heartbeat};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_str());
    }

    #[test]
    fn new_record_is_alive() {
        let record = ConnectionRecord::new();
        assert!(record.is_alive());
        assert!(!record.is_terminated());
        assert!(!record.is_close_requested());
        assert!(!record.heartbeat_released());
    }

    #[test]
    fn check_alive_clears_flag() {
        let record = ConnectionRecord::new();
        assert!(record.check_alive());
        assert!(!record.is_alive());
        assert!(!record.check_alive());
        record.mark_alive();
        assert!(record.check_alive());
    }

    #[test]
    fn cancel_without_heartbeat_counts_once() {
        let record = ConnectionRecord::new();
        assert!(record.cancel_heartbeat());
        assert!(!record.cancel_heartbeat());
        assert!(record.heartbeat_released());
    }

    #[tokio::test]
    async fn cancel_active_heartbeat_once() {
        let record = Arc::new(ConnectionRecord::new());
        let (tx, _rx) = mpsc::channel(4);
        assert!(spawn_heartbeat(record.clone(), HeartbeatConfig::default(), tx));

        assert!(record.cancel_heartbeat());
        assert!(!record.cancel_heartbeat());
        assert!(!record.cancel_heartbeat());
    }

    #[tokio::test]
    async fn concurrent_cancels_release_once() {
        let record = Arc::new(ConnectionRecord::new());
        let (tx, _rx) = mpsc::channel(4);
        spawn_heartbeat(record.clone(), HeartbeatConfig::default(), tx);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let record = record.clone();
                tokio::spawn(async move { record.cancel_heartbeat() })
            })
            .collect();

        let mut released = 0;
        for handle in handles {
            if handle.await.unwrap() {
                released += 1;
            }
        }
        assert_eq!(released, 1);
    }

    #[tokio::test]
    async fn heartbeat_attached_after_release_is_refused() {
        let record = Arc::new(ConnectionRecord::new());
        record.cancel_heartbeat();

        let (tx, _rx) = mpsc::channel(4);
        assert!(!spawn_heartbeat(record.clone(), HeartbeatConfig::default(), tx));
        assert!(record.heartbeat_released());
    }

    #[tokio::test]
    async fn close_and_terminate_signals() {
        let record = Arc::new(ConnectionRecord::new());

        record.request_close();
        record.close_requested().await;
        assert!(record.is_close_requested());

        record.terminate();
        record.terminate();
        record.terminated().await;
        assert!(record.is_terminated());
    }
}
