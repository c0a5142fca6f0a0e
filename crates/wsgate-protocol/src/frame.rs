//! Application control frames.
//!
//! Frames are JSON objects discriminated by a string `type` field:
//!   - inbound  `{ "type": "pong" }`  application-level liveness acknowledgment
//!   - outbound `{ "type": "ack" }`   reply to an inbound `pong`
//!   - outbound `{ "type": "error", "message": "..." }` undecodable payload
//!
//! Any other inbound `type` belongs to the application layer and is handed
//! on untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Control frame `type` values.
pub struct FrameTypes;

impl FrameTypes {
    pub const PONG: &str = "pong";
    pub const ACK: &str = "ack";
    pub const ERROR: &str = "error";
}

/// Message carried by the error frame sent for undecodable payloads.
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

// ─────────────────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded inbound frame: a JSON object with a string `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    kind: String,
    body: Map<String, Value>,
}

impl InboundFrame {
    /// Decode a text payload.
    pub fn decode(text: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Decode a binary payload as UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, GatewayError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| GatewayError::Schema(format!("payload is not UTF-8: {e}")))?;
        Self::decode(text)
    }

    fn from_value(value: Value) -> Result<Self, GatewayError> {
        let Value::Object(body) = value else {
            return Err(GatewayError::Schema("expected a JSON object".into()));
        };
        let kind = match body.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(GatewayError::Schema("`type` must be a string".into())),
            None => return Err(GatewayError::Schema("missing `type` field".into())),
        };
        Ok(Self { kind, body })
    }

    /// The frame's `type` value.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_pong(&self) -> bool {
        self.kind == FrameTypes::PONG
    }

    /// The full decoded object, `type` included.
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────────────────

/// Frames the gateway itself emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ack,
    Error { message: String },
}

impl ControlFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The reply to a payload that failed to decode.
    pub fn invalid_format() -> Self {
        Self::error(INVALID_MESSAGE_FORMAT)
    }

    pub fn to_json(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}
