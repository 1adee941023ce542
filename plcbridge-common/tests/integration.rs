//! Integration tests for the plcbridge-common library.

use plcbridge_common::{GroupPayload, TagValue, resolve_topic};

#[test]
fn test_full_payload_workflow() {
    // Assemble a payload the way the scheduler does after a successful tick
    let payload = GroupPayload::assemble(vec![
        ("temperature".to_string(), TagValue::Float(23.5)),
        ("pressure".to_string(), TagValue::Integer(1013)),
        ("running".to_string(), TagValue::Bool(true)),
    ]);

    let topic = resolve_topic("plant/", &["cell3", "plc01"], "Line1");
    assert_eq!(topic, "plant/cell3/plc01/Line1");

    // Encode as the JSON message body
    let body = payload.to_json().expect("JSON encode failed");

    // Round-trip: the decoded mapping equals the original key/value set
    // plus a valid timestamp
    let decoded: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&body).expect("JSON decode failed");

    assert_eq!(decoded.len(), 4);
    assert_eq!(decoded["temperature"], serde_json::json!(23.5));
    assert_eq!(decoded["pressure"], serde_json::json!(1013));
    assert_eq!(decoded["running"], serde_json::json!(true));

    let timestamp = decoded["timestamp"].as_str().expect("timestamp not a string");
    assert_eq!(timestamp, payload.timestamp());
    chrono::DateTime::parse_from_rfc3339(timestamp).expect("timestamp not ISO-8601");
}

#[test]
fn test_topic_resolution_matches_payload_group() {
    // Recomputing the topic for the same configuration yields the same string
    let values = ["hall1".to_string(), "plc02".to_string()];

    for _ in 0..3 {
        assert_eq!(
            resolve_topic("factory/", &values, "Pumps"),
            "factory/hall1/plc02/Pumps"
        );
    }
}

#[test]
fn test_payload_values_pass_through_unchanged() {
    let payload = GroupPayload::with_timestamp(
        "2024-05-01T12:00:00.000Z",
        vec![
            ("count".to_string(), TagValue::Integer(-7)),
            ("label".to_string(), TagValue::Text("idle".to_string())),
        ],
    );

    let decoded: serde_json::Value =
        serde_json::from_slice(&payload.to_json().unwrap()).unwrap();

    assert_eq!(decoded["count"], serde_json::json!(-7));
    assert_eq!(decoded["label"], serde_json::json!("idle"));
}
