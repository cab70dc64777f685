use primal_common::protocol::ws::{Envelope, SystemEvent};
use serde_json::Value;

#[test]
fn system_event_shapes_match_the_wire_contract() {
    let samples = [
        (
            SystemEvent::Joined { room: "s1".to_string(), peer_id: "p1".to_string() },
            "joined",
            &["type", "room", "peerId"][..],
        ),
        (
            SystemEvent::PeerJoined { room: "s1".to_string(), peer_id: "p1".to_string() },
            "peer-joined",
            &["type", "room", "peerId"][..],
        ),
        (
            SystemEvent::PeerLeft { room: "s1".to_string(), peer_id: "p1".to_string() },
            "peer-left",
            &["type", "room", "peerId"][..],
        ),
        (
            SystemEvent::StreamEnded { stream_id: "s1".to_string() },
            "stream-ended",
            &["type", "streamId"][..],
        ),
    ];

    for (event, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(&event).expect("system event should serialize");
        assert_eq!(value["type"], expected_type);
        let object = value.as_object().expect("system event should be a JSON object");
        assert_eq!(
            object.len(),
            expected_keys.len(),
            "`{expected_type}` frame must carry exactly its contract keys",
        );
        for key in expected_keys {
            assert!(
                object.contains_key(*key),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn envelope_round_trips_arbitrary_payload_fields() {
    let raw = r#"{"room":"s1","type":"ice-candidate","to":"b","from":"a","candidate":{"sdpMid":"0"},"label":3}"#;
    let envelope = Envelope::parse(raw).expect("envelope should parse");

    let reencoded = serde_json::to_value(&envelope).expect("envelope should serialize");
    let original: Value = serde_json::from_str(raw).expect("sample should be valid JSON");
    assert_eq!(reencoded, original);
}

#[test]
fn envelope_optional_fields_are_omitted_when_absent() {
    let envelope = Envelope::parse(r#"{"room":"s1","type":"chat","message":"hi"}"#)
        .expect("envelope should parse");
    let value = serde_json::to_value(&envelope).expect("envelope should serialize");
    let object = value.as_object().expect("envelope should be a JSON object");

    assert!(!object.contains_key("to"));
    assert!(!object.contains_key("from"));
    assert!(!object.contains_key("peerId"));
    assert_eq!(object["message"], "hi");
}
