//! wsgate Server: the explicitly owned gateway object.
//!
//! `Gateway` binds the transport, owns the shutdown state and hands both to
//! the `ShutdownOrchestrator`, which runs the drain sequence exactly once.

pub mod config;
pub mod gateway;
pub mod orchestrator;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use orchestrator::{ShutdownOrchestrator, ShutdownOutcome};
