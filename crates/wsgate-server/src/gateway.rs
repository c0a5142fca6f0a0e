//! Gateway: single-init, single-teardown owner of the running service.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use wsgate_protocol::GatewayError;
use wsgate_transport::{
    ConnectionRegistry, FrameHandler, ShutdownState, TransportServer,
};

use crate::config::GatewayConfig;
use crate::orchestrator::{ShutdownOrchestrator, ShutdownOutcome};

/// A started gateway. Construct with `start`, tear down with
/// `run_until_shutdown`, which consumes it.
pub struct Gateway {
    transport: Arc<TransportServer>,
    state: Arc<ShutdownState>,
    drain_timeout: Duration,
}

impl Gateway {
    /// Bind the host listener and begin accepting upgrades.
    pub async fn start<H: FrameHandler>(
        config: GatewayConfig,
        handler: H,
    ) -> Result<Self, GatewayError> {
        let state = Arc::new(ShutdownState::new());
        let transport = TransportServer::start(config.transport, handler, state.clone()).await?;
        info!(
            port = transport.port(),
            drain_timeout_ms = config.drain_timeout.as_millis() as u64,
            "gateway started"
        );
        Ok(Self {
            transport: Arc::new(transport),
            state,
            drain_timeout: config.drain_timeout,
        })
    }

    pub fn port(&self) -> u16 {
        self.transport.port()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.transport.registry()
    }

    /// The shutdown state machine. Signal handlers and fault hooks call
    /// `request_shutdown` on it.
    pub fn shutdown_state(&self) -> Arc<ShutdownState> {
        self.state.clone()
    }

    /// Serve until a shutdown is requested, then drain.
    pub async fn run_until_shutdown(self) -> ShutdownOutcome {
        let registry = self.transport.registry().clone();
        ShutdownOrchestrator::new(self.state, registry, self.transport, self.drain_timeout)
            .run()
            .await
    }
}
