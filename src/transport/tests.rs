use super::message::{ClientMessage, ServerMessage};
use serde_json::json;

#[test]
fn test_parse_hello() {
    let msg = json!({
        "type": "hello",
        "primary_id": "U1",
        "group_id": "W1"
    })
    .to_string();

    match serde_json::from_str::<ClientMessage>(&msg).unwrap() {
        ClientMessage::Hello {
            primary_id,
            group_id,
        } => {
            assert_eq!(primary_id, "U1");
            assert_eq!(group_id, "W1");
        }
        other => panic!("Expected hello, got {:?}", other),
    }
}

#[test]
fn test_parse_publish() {
    let msg = json!({
        "type": "publish",
        "topic": "workspace:W1",
        "notification": { "type": "story_created", "data": { "id": 9 } }
    })
    .to_string();

    match serde_json::from_str::<ClientMessage>(&msg).unwrap() {
        ClientMessage::Publish {
            topic,
            notification,
        } => {
            assert_eq!(topic, "workspace:W1");
            assert_eq!(notification.kind, "story_created");
            assert_eq!(notification.data, json!({ "id": 9 }));
        }
        other => panic!("Expected publish, got {:?}", other),
    }
}

#[test]
fn test_reject_unknown_frame() {
    let msg = json!({ "type": "subscribe", "topic": "anything" }).to_string();
    assert!(serde_json::from_str::<ClientMessage>(&msg).is_err());
}

#[test]
fn test_server_message_wire_format() {
    let connected = ServerMessage::Connected {
        client_id: "c-1".to_string(),
        timestamp: 42,
    };
    assert_eq!(
        serde_json::to_value(&connected).unwrap(),
        json!({ "type": "connected", "client_id": "c-1", "timestamp": 42 })
    );

    assert_eq!(
        serde_json::to_value(ServerMessage::error("boom")).unwrap(),
        json!({ "type": "error", "message": "boom" })
    );

    match ServerMessage::keepalive() {
        ServerMessage::KeepAlive { timestamp } => assert!(timestamp > 0),
        other => panic!("Expected keepalive, got {:?}", other),
    }
}
