//! wsgate Transport Layer
//!
//! Accepts WebSocket upgrades on the host HTTP listener and owns everything
//! that happens per connection:
//! - Connection lifecycle (register, supervise, unregister)
//! - Transport-level heartbeat / stale connection detection
//! - Control-frame dispatch
//! - The process-wide shutdown phase shared with the orchestrator
//!
//! Application frames are handed to a `FrameHandler`; closing the host
//! listener is exposed through `HostListener`.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod lifecycle;
pub mod registry;
pub mod server;

pub use connection::{ConnectionId, ConnectionRecord};
pub use heartbeat::{HeartbeatConfig, HeartbeatResult};
pub use lifecycle::{Phase, ShutdownReason, ShutdownState};
pub use registry::{ConnectionRegistry, RegistryStats};
pub use server::{DiscardHandler, FrameHandler, HostListener, TransportConfig, TransportServer};
