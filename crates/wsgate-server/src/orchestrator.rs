//! Shutdown orchestration: listener close → connection drain → exit.
//!
//! Entry into `Draining` happens through `ShutdownState::request_shutdown`
//! (signals, fatal faults). The orchestrator then, in order:
//!   1. relies on the `Draining` phase to refuse new upgrades,
//!   2. asks every live connection to close,
//!   3. waits at most `drain_timeout` for the registry to empty and the host
//!      listener to close.
//! If the wait runs out, remaining connections are force-terminated and the
//! outcome reports a failure exit.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use wsgate_transport::{ConnectionRegistry, HostListener, ShutdownState};

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection closed and the host listener closed in time.
    Drained,
    /// The drain timeout elapsed; `remaining` connections were terminated.
    TimedOut { remaining: usize },
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Drained => 0,
            Self::TimedOut { .. } => 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Drained)
    }
}

pub struct ShutdownOrchestrator<L: HostListener> {
    state: Arc<ShutdownState>,
    registry: Arc<ConnectionRegistry>,
    listener: Arc<L>,
    drain_timeout: Duration,
}

impl<L: HostListener> ShutdownOrchestrator<L> {
    pub fn new(
        state: Arc<ShutdownState>,
        registry: Arc<ConnectionRegistry>,
        listener: Arc<L>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            state,
            registry,
            listener,
            drain_timeout,
        }
    }

    /// Wait for a shutdown request, then drain. Consumes the orchestrator so
    /// the drain sequence can only run once.
    pub async fn run(self) -> ShutdownOutcome {
        self.state.drain_requested().await;
        self.drain().await
    }

    async fn drain(&self) -> ShutdownOutcome {
        let reason = self
            .state
            .reason()
            .map(|r| r.to_string())
            .unwrap_or_default();
        info!(
            %reason,
            live = self.registry.len(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "draining gateway, new upgrades refused"
        );

        let mut notified = 0usize;
        self.registry.for_each_live(|record| {
            record.request_close();
            notified += 1;
        });
        info!(notified, "close requested on live connections");

        let drained = tokio::time::timeout(self.drain_timeout, async {
            self.registry.wait_until_empty().await;
            self.listener.close().await;
        })
        .await;

        let outcome = match drained {
            Ok(()) => {
                info!("all connections closed, host listener closed");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                let remaining = self.registry.terminate_all();
                error!(
                    remaining,
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "drain timed out, forcing exit"
                );
                ShutdownOutcome::TimedOut { remaining }
            }
        };

        self.state.mark_closed();
        outcome
    }
}
