//! wsgate Protocol Types
//!
//! The small JSON control vocabulary exchanged over gateway connections,
//! the gateway error taxonomy, and the reference limits shared by the
//! transport and server crates.

pub mod error;
pub mod frame;
pub mod limits;

pub use error::GatewayError;
pub use frame::{ControlFrame, FrameTypes, InboundFrame};
pub use limits::Limits;
