//! Gateway error taxonomy.

use thiserror::Error;

/// Errors surfaced by the gateway crates.
///
/// `Decode` and `Schema` are connection-local and answered with an `error`
/// frame. `Transport` affects only the connection it was raised on.
/// `ShuttingDown` and `CapacityReached` refuse new connections.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("frame is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame does not match the control schema: {0}")]
    Schema(String),

    #[error("gateway is shutting down")]
    ShuttingDown,

    #[error("connection limit reached ({0})")]
    CapacityReached(usize),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid listen address: {0}")]
    Bind(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether this error is answered in-band and leaves the connection open.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Schema(_))
    }
}
