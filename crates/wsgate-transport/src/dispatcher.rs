//! Inbound frame dispatch.
//!
//! `pong` is answered with `ack`; other well-formed frames go to the
//! application `FrameHandler`; anything undecodable is answered with an
//! `error` frame and the connection stays open.

use tracing::{debug, warn};
use wsgate_protocol::{ControlFrame, GatewayError, InboundFrame};

use crate::connection::ConnectionId;

/// What the connection task should do with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Send this control frame back to the peer.
    Reply(ControlFrame),
    /// Hand the frame to the application layer unmodified.
    Forward(InboundFrame),
}

pub fn dispatch_text(client_id: &ConnectionId, text: &str) -> Dispatch {
    route(client_id, InboundFrame::decode(text))
}

pub fn dispatch_binary(client_id: &ConnectionId, bytes: &[u8]) -> Dispatch {
    route(client_id, InboundFrame::decode_bytes(bytes))
}

fn route(client_id: &ConnectionId, decoded: Result<InboundFrame, GatewayError>) -> Dispatch {
    match decoded {
        Ok(frame) if frame.is_pong() => {
            debug!(%client_id, "application pong");
            Dispatch::Reply(ControlFrame::Ack)
        }
        Ok(frame) => {
            debug!(%client_id, kind = frame.kind(), "forwarding application frame");
            Dispatch::Forward(frame)
        }
        Err(e) => {
            warn!(%client_id, error = %e, "invalid message format");
            Dispatch::Reply(ControlFrame::invalid_format())
        }
    }
}
