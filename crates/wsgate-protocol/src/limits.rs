//! Reference values for the gateway's timers, paths and size caps.

use std::time::Duration;

/// Reference constants. Timers and size caps are defaults that
/// configuration can override; the paths are fixed.
pub struct Limits;

impl Limits {
    /// Period of the transport-level ping/pong liveness check.
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

    /// Consecutive unanswered probes tolerated before forced termination.
    pub const MAX_MISSED_HEARTBEATS: u32 = 1;

    /// Upper bound on the drain phase of shutdown.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(10_000);

    /// Largest inbound frame accepted (5 MiB).
    pub const MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

    /// Default cap on concurrently registered connections.
    pub const MAX_CONNECTIONS: usize = 1024;

    /// Path that accepts the WebSocket upgrade.
    pub const UPGRADE_PATH: &str = "/ws";

    /// Liveness endpoint of the host listener.
    pub const HEALTH_PATH: &str = "/health";

    /// Close reason sent to peers when the gateway drains.
    pub const DRAIN_CLOSE_REASON: &str = "Server shutting down";
}
