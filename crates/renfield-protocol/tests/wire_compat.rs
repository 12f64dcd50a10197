// Wire-shape assertions for the device protocol — these must never break
// without a protocol version bump.

use renfield_core::types::{DeviceCapabilities, DeviceKind};
use renfield_protocol::frames::{DeviceFrame, ServerFrame};

#[test]
fn register_frame_round_trips_with_capabilities() {
    let frame = DeviceFrame::Register {
        device_id: "kitchen-panel-1".into(),
        kind: DeviceKind::StationaryPanel,
        capabilities: DeviceCapabilities {
            has_microphone: true,
            has_speaker: true,
            has_wakeword: true,
            has_display: true,
        },
        room_id: Some("kitchen".into()),
    };
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains(r#""type":"register""#));

    let back: DeviceFrame = serde_json::from_str(&json).unwrap();
    match back {
        DeviceFrame::Register { device_id, room_id, .. } => {
            assert_eq!(device_id, "kitchen-panel-1");
            assert_eq!(room_id.as_deref(), Some("kitchen"));
        }
        other => panic!("expected register frame, got {other:?}"),
    }
}

#[test]
fn unknown_frame_type_fails_to_parse() {
    let json = r#"{"type":"not_a_real_frame"}"#;
    let result: Result<DeviceFrame, _> = serde_json::from_str(json);
    assert!(result.is_err(), "unrecognized frame type must not silently parse");
}

#[test]
fn heartbeat_has_no_body() {
    let json = r#"{"type":"heartbeat"}"#;
    let frame: DeviceFrame = serde_json::from_str(json).unwrap();
    assert!(matches!(frame, DeviceFrame::Heartbeat));
}

#[test]
fn done_and_error_are_distinct_variants() {
    // §7: exactly one of `done`/`error` terminates a turn. Representing them
    // as distinct enum variants makes emitting both for one turn a caller
    // bug, not a wire possibility.
    let done = ServerFrame::Done {
        session_id: "s1".into(),
        tts_handled: true,
        intent: Some("homeassistant__turn_on".into()),
    };
    let err = ServerFrame::error(Some("s1".into()), "ToolTimeout", "tool call timed out");

    let done_json = serde_json::to_value(&done).unwrap();
    let err_json = serde_json::to_value(&err).unwrap();
    assert_eq!(done_json["type"], "done");
    assert_eq!(err_json["type"], "error");
    assert_ne!(done_json["type"], err_json["type"]);
}

#[test]
fn error_frame_carries_taxonomy_kind_not_raw_message_only() {
    let err = ServerFrame::error(None, "RateLimited", "try again shortly");
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["kind"], "RateLimited");
    assert_eq!(json["message"], "try again shortly");
}

#[test]
fn rag_context_without_sources_omits_empty_vec_noise() {
    let frame = ServerFrame::RagContext {
        session_id: "s1".into(),
        has_context: false,
        sources: None,
    };
    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["has_context"], false);
    assert!(json["sources"].is_null());
}

#[test]
fn done_carries_tts_handled_flag() {
    let spoken = ServerFrame::Done { session_id: "s1".into(), tts_handled: true, intent: None };
    let silent = ServerFrame::Done { session_id: "s1".into(), tts_handled: false, intent: None };
    assert_eq!(serde_json::to_value(&spoken).unwrap()["tts_handled"], true);
    assert_eq!(serde_json::to_value(&silent).unwrap()["tts_handled"], false);
}

#[test]
fn notification_frame_carries_no_session_id() {
    let frame = ServerFrame::Notification {
        notification_id: "n1".into(),
        title: "Package delivered".into(),
        body: None,
    };
    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["type"], "notification");
    assert!(json.get("session_id").is_none());
}

#[test]
fn register_ack_reports_negotiated_room() {
    let ack = ServerFrame::RegisterAck {
        success: true,
        device_id: "d1".into(),
        room_id: "living-room".into(),
        capabilities: renfield_core::types::DeviceCapabilities::default(),
        protocol: renfield_core::config::PROTOCOL_VERSION,
    };
    let json = serde_json::to_string(&ack).unwrap();
    assert!(json.contains(r#""type":"register_ack""#));
    assert!(json.contains(r#""room_id":"living-room""#));
    assert!(json.contains(r#""success":true"#));
}
