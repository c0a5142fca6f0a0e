//! Gateway configuration.

use std::time::Duration;

use wsgate_protocol::Limits;
use wsgate_transport::TransportConfig;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listener, heartbeat and frame limits
    pub transport: TransportConfig,
    /// Upper bound on the drain phase before the process exits with failure
    pub drain_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            drain_timeout: Limits::DRAIN_TIMEOUT,
        }
    }
}
