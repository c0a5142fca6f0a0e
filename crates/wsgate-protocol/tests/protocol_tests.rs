//! Protocol layer tests: control frame encoding, inbound decoding, errors.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wsgate_protocol::frame::INVALID_MESSAGE_FORMAT;
    use wsgate_protocol::*;

    // ─────────────────────────────────────────────────────────────────────
    // ControlFrame
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn ack_serializes_to_type_only() {
        let json = serde_json::to_value(ControlFrame::Ack).unwrap();
        assert_eq!(json, json!({ "type": "ack" }));
        assert_eq!(json["type"], FrameTypes::ACK);
    }

    #[test]
    fn error_frame_carries_message() {
        let json = serde_json::to_value(ControlFrame::error("boom")).unwrap();
        assert_eq!(json, json!({ "type": "error", "message": "boom" }));
    }

    #[test]
    fn invalid_format_uses_fixed_message() {
        let frame = ControlFrame::invalid_format();
        let text = frame.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], FrameTypes::ERROR);
        assert_eq!(parsed["message"], INVALID_MESSAGE_FORMAT);
        assert_eq!(parsed["message"], "Invalid message format");
    }

    #[test]
    fn control_frame_deserializes_from_wire() {
        let frame: ControlFrame = serde_json::from_value(json!({ "type": "ack" })).unwrap();
        assert_eq!(frame, ControlFrame::Ack);
    }

    // ─────────────────────────────────────────────────────────────────────
    // InboundFrame
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn decodes_pong() {
        let frame = InboundFrame::decode(r#"{"type":"pong"}"#).unwrap();
        assert!(frame.is_pong());
        assert_eq!(frame.kind(), "pong");
    }

    #[test]
    fn keeps_extra_fields_of_application_frames() {
        let frame = InboundFrame::decode(r#"{"type":"chat","room":"a","n":3}"#).unwrap();
        assert!(!frame.is_pong());
        assert_eq!(frame.kind(), "chat");
        assert_eq!(frame.body()["room"], "a");
        assert_eq!(frame.into_value(), json!({ "type": "chat", "room": "a", "n": 3 }));
    }

    #[test]
    fn non_json_is_decode_error() {
        let err = InboundFrame::decode("not json at all").unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn empty_payload_is_decode_error() {
        assert!(matches!(InboundFrame::decode(""), Err(GatewayError::Decode(_))));
    }

    #[test]
    fn array_is_schema_error() {
        let err = InboundFrame::decode("[1,2,3]").unwrap_err();
        assert!(matches!(err, GatewayError::Schema(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn missing_type_is_schema_error() {
        let err = InboundFrame::decode(r#"{"kind":"pong"}"#).unwrap_err();
        assert!(err.to_string().contains("missing `type`"));
    }

    #[test]
    fn non_string_type_is_schema_error() {
        let err = InboundFrame::decode(r#"{"type":7}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Schema(_)));
    }

    #[test]
    fn binary_payload_decodes_as_utf8_json() {
        let frame = InboundFrame::decode_bytes(br#"{"type":"pong"}"#).unwrap();
        assert!(frame.is_pong());
    }

    #[test]
    fn invalid_utf8_is_schema_error() {
        let err = InboundFrame::decode_bytes(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, GatewayError::Schema(_)));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors and limits
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn lifecycle_errors_are_not_recoverable() {
        assert!(!GatewayError::ShuttingDown.is_recoverable());
        assert!(!GatewayError::CapacityReached(4).is_recoverable());
        assert!(!GatewayError::Transport("reset".into()).is_recoverable());
    }

    #[test]
    fn capacity_error_mentions_limit() {
        assert_eq!(
            GatewayError::CapacityReached(32).to_string(),
            "connection limit reached (32)"
        );
    }

    #[test]
    fn reference_limits() {
        assert_eq!(Limits::HEARTBEAT_INTERVAL.as_millis(), 30_000);
        assert_eq!(Limits::DRAIN_TIMEOUT.as_millis(), 10_000);
        assert_eq!(Limits::MAX_FRAME_BYTES, 5_242_880);
        assert_eq!(Limits::MAX_MISSED_HEARTBEATS, 1);
        assert_eq!(Limits::UPGRADE_PATH, "/ws");
    }
}
