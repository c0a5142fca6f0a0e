//! Process-wide shutdown phase: `Running → Draining → Closed`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// Shutdown phase of the gateway. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Closed,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            RUNNING => Self::Running,
            DRAINING => Self::Draining,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// Why the drain was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An external termination signal (SIGINT, SIGTERM, ...).
    Signal(String),
    /// An unrecoverable process-level fault.
    Fault(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Fault(message) => write!(f, "fault: {message}"),
        }
    }
}

/// The single shutdown state machine of the process.
///
/// `request_shutdown` is the only entry into `Draining`; it succeeds once
/// per process lifetime. Anything that must stop taking new work reads
/// `is_running`.
pub struct ShutdownState {
    phase: AtomicU8,
    reason: Mutex<Option<ShutdownReason>>,
    drain: CancellationToken,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(RUNNING),
            reason: Mutex::new(None),
            drain: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Enter `Draining`. Returns `false` if a drain was already requested.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        match self
            .phase
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                info!(%reason, "shutdown requested");
                *self.reason.lock() = Some(reason);
                self.drain.cancel();
                true
            }
            Err(current) => {
                warn!(
                    %reason,
                    phase = Phase::from_u8(current).as_str(),
                    "shutdown already in progress, ignoring"
                );
                false
            }
        }
    }

    /// Resolves once `request_shutdown` has succeeded.
    pub async fn drain_requested(&self) {
        self.drain.cancelled().await;
    }

    /// The reason recorded by the successful `request_shutdown` call.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().clone()
    }

    /// Move `Draining → Closed`. Returns `false` from any other phase.
    pub fn mark_closed(&self) -> bool {
        self.phase
            .compare_exchange(DRAINING, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
