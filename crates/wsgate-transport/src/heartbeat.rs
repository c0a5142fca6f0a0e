//! Heartbeat ping/pong liveness supervision.
//!
//! Edge-triggered: each tick reads and clears the record's alive flag and
//! sends a probe; only a transport-level pong sets the flag again. A peer
//! that leaves `max_missed` consecutive probes unanswered is terminated on
//! the following tick, so with the default of one tolerated miss the
//! detection latency is between one and two periods.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wsgate_protocol::Limits;

use crate::connection::ConnectionRecord;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Probe period.
    pub interval: Duration,
    /// Consecutive unanswered probes before termination (at least 1).
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Limits::HEARTBEAT_INTERVAL,
            max_missed: Limits::MAX_MISSED_HEARTBEATS,
        }
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped answering; the connection was terminated.
    TimedOut,
    /// Stopped from outside, or the connection went away first.
    Cancelled,
}

/// A running heartbeat, owned by its `ConnectionRecord`.
#[derive(Debug)]
pub struct HeartbeatHandle {
    cancel: CancellationToken,
}

impl HeartbeatHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Start supervising `record`. Probes are queued on `probe_tx` for the
/// connection task to write as ping frames.
///
/// Returns `false` if the record was already released, in which case the
/// heartbeat is stopped immediately.
pub fn spawn_heartbeat(
    record: Arc<ConnectionRecord>,
    config: HeartbeatConfig,
    probe_tx: mpsc::Sender<Bytes>,
) -> bool {
    record.mark_alive();
    let cancel = CancellationToken::new();
    tokio::spawn(run_heartbeat(
        record.clone(),
        config,
        probe_tx,
        cancel.clone(),
    ));
    record.attach_heartbeat(HeartbeatHandle { cancel })
}

/// Run heartbeat probes for a connection until it times out or is cancelled.
pub async fn run_heartbeat(
    record: Arc<ConnectionRecord>,
    config: HeartbeatConfig,
    probe_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let max_missed = config.max_missed.max(1);
    // First probe one full period after start, not immediately.
    let mut ticker = time::interval_at(time::Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = ticker.tick() => {
                if record.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        warn!(client_id = %record.id, missed, "heartbeat timed out, terminating");
                        record.terminate();
                        return HeartbeatResult::TimedOut;
                    }
                }

                match probe_tx.try_send(Bytes::new()) {
                    Ok(()) => debug!(client_id = %record.id, "heartbeat probe sent"),
                    // Previous probe not written yet; it still counts as outstanding.
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => return HeartbeatResult::Cancelled,
                }
            }
        }
    }
}
