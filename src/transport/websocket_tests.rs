use crate::broker::{Broker, MemoryBroker, Notification};
use crate::config::HubSettings;
use crate::hub::Hub;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::websocket::{bind, start_websocket_server};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

struct TestServer {
    url: String,
    hub: Hub,
    broker: MemoryBroker,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.hub.shutdown();
    }
}

async fn start_server(settings: HubSettings) -> TestServer {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let hub = Hub::new(shared.clone(), &settings);
    let listener = bind("127.0.0.1:0").await.expect("Failed to bind");
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();

    tokio::spawn(start_websocket_server(
        listener,
        hub.clone(),
        shared,
        settings,
        shutdown.clone(),
    ));

    TestServer {
        url,
        hub,
        broker,
        shutdown,
    }
}

async fn send(ws_stream: &mut TestSocket, msg: &ClientMessage) {
    ws_stream
        .send(WsMessage::Text(serde_json::to_string(msg).unwrap().into()))
        .await
        .expect("Failed to send frame");
}

async fn next_text(ws_stream: &mut TestSocket) -> String {
    let msg = timeout(WAIT, ws_stream.next())
        .await
        .expect("Timed out waiting for a frame")
        .expect("Connection closed")
        .expect("Connection failed");
    msg.into_text().expect("Expected a text frame").as_str().to_string()
}

async fn next_server_message(ws_stream: &mut TestSocket) -> ServerMessage {
    let text = next_text(ws_stream).await;
    serde_json::from_str(&text)
        .unwrap_or_else(|e| panic!("Failed to deserialize ServerMessage from '{text}': {e}"))
}

async fn connect(server: &TestServer, primary_id: &str, group_id: &str) -> TestSocket {
    let (mut ws_stream, _) = connect_async(server.url.as_str())
        .await
        .expect("WebSocket handshake failed");
    send(
        &mut ws_stream,
        &ClientMessage::Hello {
            primary_id: primary_id.to_string(),
            group_id: group_id.to_string(),
        },
    )
    .await;

    match next_server_message(&mut ws_stream).await {
        ServerMessage::Connected { client_id, .. } => assert!(!client_id.is_empty()),
        other => panic!("Expected Connected, got {:?}", other),
    }
    ws_stream
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_hello_registers_client() {
    let server = start_server(HubSettings::default()).await;
    let _ws_stream = connect(&server, "U1", "W1").await;

    assert_eq!(server.hub.connection_count("U1"), 1);
}

#[tokio::test]
async fn test_server_refuses_zero_transport_timers() {
    for settings in [
        HubSettings {
            keepalive_secs: 0,
            ..HubSettings::default()
        },
        HubSettings {
            handshake_timeout_secs: 0,
            ..HubSettings::default()
        },
    ] {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let hub = Hub::new(broker.clone(), &settings);
        let listener = bind("127.0.0.1:0").await.expect("Failed to bind");

        let result = timeout(
            WAIT,
            start_websocket_server(listener, hub, broker, settings, CancellationToken::new()),
        )
        .await
        .expect("server should refuse to start");
        assert!(result.is_err());
    }
}

#[tokio::test]
async fn test_first_frame_must_be_hello() {
    let server = start_server(HubSettings::default()).await;
    let (mut ws_stream, _) = connect_async(server.url.as_str()).await.unwrap();

    send(
        &mut ws_stream,
        &ClientMessage::Publish {
            topic: "workspace:W1".to_string(),
            notification: Notification::new("story_created", json!(null)),
        },
    )
    .await;

    match next_server_message(&mut ws_stream).await {
        ServerMessage::Error { message } => assert!(message.contains("hello")),
        other => panic!("Expected Error, got {:?}", other),
    }
    assert_eq!(server.hub.client_count(), 0);
}

#[tokio::test]
async fn test_invalid_identity_is_rejected() {
    let server = start_server(HubSettings::default()).await;
    let (mut ws_stream, _) = connect_async(server.url.as_str()).await.unwrap();

    send(
        &mut ws_stream,
        &ClientMessage::Hello {
            primary_id: "".to_string(),
            group_id: "W1".to_string(),
        },
    )
    .await;

    match next_server_message(&mut ws_stream).await {
        ServerMessage::Error { message } => assert!(message.contains("invalid client identity")),
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_broker_notification_is_forwarded() {
    let server = start_server(HubSettings::default()).await;
    let mut ws_stream = connect(&server, "U1", "W1").await;
    eventually("direct subscription", || {
        server.broker.subscriber_count("user:U1") == 1
    })
    .await;

    let payload = json!({ "type": "story_assigned", "data": { "story_id": 12 } }).to_string();
    server
        .broker
        .publish("user:U1", payload.clone().into())
        .await
        .unwrap();

    assert_eq!(next_text(&mut ws_stream).await, payload);
}

#[tokio::test]
async fn test_publish_frame_reaches_group_members() {
    let server = start_server(HubSettings::default()).await;
    let mut publisher = connect(&server, "U1", "W1").await;
    let mut member = connect(&server, "U2", "W1").await;
    eventually("group subscriptions", || {
        server.broker.subscriber_count("workspace:W1") == 2
    })
    .await;

    let notification = Notification::new("sprint_started", json!({ "sprint": 3 }));
    send(
        &mut publisher,
        &ClientMessage::Publish {
            topic: "workspace:W1".to_string(),
            notification: notification.clone(),
        },
    )
    .await;

    let received: Notification = serde_json::from_str(&next_text(&mut member).await).unwrap();
    assert_eq!(received, notification);

    // the publisher is a member too, so its ack and the notification may interleave
    let mut acked = false;
    for _ in 0..2 {
        let text = next_text(&mut publisher).await;
        if let Ok(ServerMessage::Published { topic, receivers }) = serde_json::from_str(&text) {
            assert_eq!(topic, "workspace:W1");
            assert_eq!(receivers, 2);
            acked = true;
        }
    }
    assert!(acked);
}

#[tokio::test]
async fn test_disconnect_unregisters_client() {
    let server = start_server(HubSettings::default()).await;
    let mut ws_stream = connect(&server, "U1", "W1").await;
    assert_eq!(server.hub.client_count(), 1);

    ws_stream.close(None).await.unwrap();

    eventually("client to be unregistered", || server.hub.client_count() == 0).await;
    eventually("bridges to exit", || server.hub.active_bridges() == 0).await;
    assert!(server.broker.topics().is_empty());
}

#[tokio::test]
async fn test_idle_connection_gets_keepalive() {
    let settings = HubSettings {
        keepalive_secs: 1,
        ..HubSettings::default()
    };
    let server = start_server(settings).await;
    let mut ws_stream = connect(&server, "U1", "W1").await;

    match next_server_message(&mut ws_stream).await {
        ServerMessage::KeepAlive { timestamp } => assert!(timestamp > 0),
        other => panic!("Expected KeepAlive, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hub_shutdown_closes_connections() {
    let server = start_server(HubSettings::default()).await;
    let mut ws_stream = connect(&server, "U1", "W1").await;

    server.hub.shutdown();

    let end = timeout(WAIT, ws_stream.next())
        .await
        .expect("Connection stayed open after shutdown");
    assert!(matches!(end, None | Some(Ok(WsMessage::Close(_))) | Some(Err(_))));
}
